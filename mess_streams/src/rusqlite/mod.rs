use rusqlite::Row;

use crate::{error::StoreResult, Entry, EntryId};

pub mod group;
pub mod migration;
pub mod read;
pub mod write;

/// Ids are stored as signed integers. Anything past `i64::MAX` only shows up
/// as an open range bound, so clamping keeps the comparison intact.
pub(crate) fn sql_int(x: u64) -> i64 {
    i64::try_from(x).unwrap_or(i64::MAX)
}

/// `LIMIT -1` is unbounded in SQLite. A count of 0 is treated the same way.
pub(crate) fn sql_limit(count: Option<usize>) -> i64 {
    match count {
        None | Some(0) => -1,
        Some(n) => i64::try_from(n).unwrap_or(i64::MAX),
    }
}

/// Expects `ms, seq, fields` as the first three columns.
pub(crate) fn entry_from_row(row: &Row<'_>) -> StoreResult<Entry> {
    let fields: String = row.get(2)?;
    Ok(Entry {
        id: EntryId::new(row.get(0)?, row.get(1)?),
        fields: serde_json::from_str(&fields)?,
    })
}
