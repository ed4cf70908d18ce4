//! SQL statements issued during fetch and flush.
//!
//! Table and column names interpolated here come from validated
//! descriptors or from columns confirmed against the live schema.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::BTreeMap;

use crate::clock::{from_epoch_millis, to_epoch_millis};
use crate::db::{DbError, DbResult};
use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::{AuditStamps, Entity, EntityId, FieldValue};

/// Inserts business fields and returns the storage-assigned identity.
pub(super) fn insert_row(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    fields: &BTreeMap<String, FieldValue>,
) -> rusqlite::Result<EntityId> {
    if fields.is_empty() {
        return conn.query_row(
            &format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {};",
                descriptor.table, descriptor.identity_field
            ),
            [],
            |row| row.get(0),
        );
    }

    let columns = fields.keys().map(String::as_str).collect::<Vec<_>>().join(", ");
    let placeholders = (1..=fields.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.query_row(
        &format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders}) RETURNING {};",
            descriptor.table, descriptor.identity_field
        ),
        params_from_iter(fields.values()),
        |row| row.get(0),
    )
}

/// Writes dirty business columns. Returns the affected row count.
pub(super) fn update_row(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    identity: EntityId,
    columns: &[(&str, &FieldValue)],
) -> rusqlite::Result<usize> {
    if columns.is_empty() {
        return Ok(0);
    }

    let assignments = columns
        .iter()
        .enumerate()
        .map(|(index, (column, _))| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let mut values: Vec<&FieldValue> = columns.iter().map(|(_, value)| *value).collect();
    let identity_value = Value::Integer(identity);
    values.push(&identity_value);

    conn.execute(
        &format!(
            "UPDATE {} SET {assignments} WHERE {} = ?{};",
            descriptor.table,
            descriptor.identity_field,
            columns.len() + 1
        ),
        params_from_iter(values),
    )
}

/// Writes audit columns whose staged value differs from `before`.
///
/// Issued as its own statement so storage-side rejection of a stamp is
/// distinguishable from rejection of business data. Returns whether a
/// statement ran.
pub(super) fn write_stamps(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    identity: EntityId,
    before: AuditStamps,
    after: AuditStamps,
) -> rusqlite::Result<bool> {
    let mut assignments: Vec<(&str, Value)> = Vec::with_capacity(2);
    if let Some(field) = descriptor.created_at_field.as_deref() {
        if before.created_at != after.created_at {
            assignments.push((field, stamp_value(after.created_at)));
        }
    }
    if let Some(field) = descriptor.updated_at_field.as_deref() {
        if before.updated_at != after.updated_at {
            assignments.push((field, stamp_value(after.updated_at)));
        }
    }
    if assignments.is_empty() {
        return Ok(false);
    }

    let set_clause = assignments
        .iter()
        .enumerate()
        .map(|(index, (column, _))| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let mut values: Vec<Value> = assignments.into_iter().map(|(_, value)| value).collect();
    values.push(Value::Integer(identity));
    let identity_index = values.len();

    conn.execute(
        &format!(
            "UPDATE {} SET {set_clause} WHERE {} = ?{identity_index};",
            descriptor.table, descriptor.identity_field
        ),
        params_from_iter(values),
    )?;
    Ok(true)
}

/// Loads one row, splitting identity, audit stamps and business fields.
pub(super) fn load_row(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    identity: EntityId,
) -> DbResult<Option<Entity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM {} WHERE {} = ?1;",
        descriptor.table, descriptor.identity_field
    ))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([identity])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let mut stamps = AuditStamps::default();
    let mut fields = BTreeMap::new();
    for (index, column) in columns.iter().enumerate() {
        let value: Value = row.get(index)?;
        if *column == descriptor.identity_field {
            continue;
        }
        if descriptor.created_at_field.as_deref() == Some(column.as_str()) {
            stamps.created_at = parse_stamp(descriptor, column, value)?;
        } else if descriptor.updated_at_field.as_deref() == Some(column.as_str()) {
            stamps.updated_at = parse_stamp(descriptor, column, value)?;
        } else {
            fields.insert(column.clone(), value);
        }
    }

    Ok(Some(Entity::loaded(
        descriptor.type_id.clone(),
        identity,
        stamps,
        fields,
    )))
}

fn stamp_value(stamp: Option<chrono::DateTime<chrono::Utc>>) -> Value {
    stamp.map_or(Value::Null, |value| Value::Integer(to_epoch_millis(value)))
}

fn parse_stamp(
    descriptor: &EntityDescriptor,
    column: &str,
    value: Value,
) -> DbResult<Option<chrono::DateTime<chrono::Utc>>> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(epoch_ms) => from_epoch_millis(epoch_ms).map(Some).ok_or_else(|| {
            DbError::InvalidData(format!(
                "out-of-range timestamp `{epoch_ms}` in {}.{column}",
                descriptor.table
            ))
        }),
        other => Err(DbError::InvalidData(format!(
            "expected epoch milliseconds in {}.{column}, got {:?}",
            descriptor.table,
            other.data_type()
        ))),
    }
}
