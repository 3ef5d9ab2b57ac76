use rusqlite::{params, Connection, OptionalExtension};

use super::{read, sql_int, write::ensure_stream};
use crate::{
    error::{Error, StoreResult},
    AutoClaim, EntryId, PendingSummary, StartId,
};

/// Creates `group` on `stream`, positioned so that the first group read
/// returns entries after `start`.
///
/// # Errors
///
/// `Error::BusyGroup` if the group exists, `Error::NoStream` if the stream
/// does not exist and `mkstream` is false.
pub fn create_group(
    conn: &Connection,
    stream: &str,
    group: &str,
    start: StartId,
    mkstream: bool,
) -> StoreResult<EntryId> {
    let last = match read::last_id(conn, stream)? {
        Some(last) => last,
        None if mkstream => ensure_stream(conn, stream)?,
        None => return Err(Error::NoStream { stream: stream.to_owned() }),
    };
    let start = match start {
        StartId::Latest => last,
        StartId::Id(id) => id,
    };
    let inserted = conn
        .prepare_cached(
            r#"
            INSERT INTO consumer_groups (stream, name, last_ms, last_seq)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (stream, name) DO NOTHING"#,
        )?
        .execute(params![stream, group, sql_int(start.ms), sql_int(start.seq)])?;
    if inserted == 0 {
        return Err(Error::BusyGroup {
            stream: stream.to_owned(),
            group: group.to_owned(),
        });
    }
    Ok(start)
}

/// # Errors
///
/// `Error::NoGroup` if the group does not exist.
pub fn last_delivered(
    conn: &Connection,
    stream: &str,
    group: &str,
) -> StoreResult<EntryId> {
    conn.prepare_cached(
        "SELECT last_ms, last_seq FROM consumer_groups WHERE stream = ?1 AND name = ?2",
    )?
    .query_row(params![stream, group], |r| {
        Ok(EntryId::new(r.get(0)?, r.get(1)?))
    })
    .optional()?
    .ok_or_else(|| Error::NoGroup {
        stream: stream.to_owned(),
        group: group.to_owned(),
    })
}

pub(crate) fn set_last_delivered(
    conn: &Connection,
    stream: &str,
    group: &str,
    id: EntryId,
) -> StoreResult<()> {
    conn.prepare_cached(
        r#"
        UPDATE consumer_groups SET last_ms = ?3, last_seq = ?4
        WHERE stream = ?1 AND name = ?2"#,
    )?
    .execute(params![stream, group, sql_int(id.ms), sql_int(id.seq)])?;
    Ok(())
}

pub(crate) fn touch_consumer(
    conn: &Connection,
    stream: &str,
    group: &str,
    consumer: &str,
    now_ms: u64,
) -> StoreResult<()> {
    conn.prepare_cached(
        r#"
        INSERT INTO consumers (stream, grp, name, seen_ms)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (stream, grp, name) DO UPDATE SET seen_ms = excluded.seen_ms"#,
    )?
    .execute(params![stream, group, consumer, sql_int(now_ms)])?;
    Ok(())
}

pub(crate) fn add_pending(
    conn: &Connection,
    stream: &str,
    group: &str,
    consumer: &str,
    id: EntryId,
    now_ms: u64,
) -> StoreResult<()> {
    conn.prepare_cached(
        r#"
        INSERT INTO pending (
            stream, grp, ms, seq, consumer, delivered_ms, delivery_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
        ON CONFLICT (stream, grp, ms, seq) DO UPDATE SET
            consumer = excluded.consumer,
            delivered_ms = excluded.delivered_ms,
            delivery_count = delivery_count + 1"#,
    )?
    .execute(params![
        stream,
        group,
        sql_int(id.ms),
        sql_int(id.seq),
        consumer,
        sql_int(now_ms)
    ])?;
    Ok(())
}

/// Hands a pending entry (back) to `consumer` and counts the delivery.
pub(crate) fn redeliver(
    conn: &Connection,
    stream: &str,
    group: &str,
    consumer: &str,
    id: EntryId,
    now_ms: u64,
) -> StoreResult<()> {
    conn.prepare_cached(
        r#"
        UPDATE pending
        SET consumer = ?5,
            delivered_ms = ?6,
            delivery_count = delivery_count + 1
        WHERE stream = ?1 AND grp = ?2 AND ms = ?3 AND seq = ?4"#,
    )?
    .execute(params![
        stream,
        group,
        sql_int(id.ms),
        sql_int(id.seq),
        consumer,
        sql_int(now_ms)
    ])?;
    Ok(())
}

/// Removes `ids` from the group's pending entries. Returns how many were
/// actually pending.
///
/// # Errors
///
/// `Error::NoGroup` if the group does not exist.
pub fn ack(
    conn: &Connection,
    stream: &str,
    group: &str,
    ids: &[EntryId],
) -> StoreResult<u64> {
    last_delivered(conn, stream, group)?;
    let mut stmt = conn.prepare_cached(
        r#"
        DELETE FROM pending
        WHERE stream = ?1 AND grp = ?2 AND ms = ?3 AND seq = ?4"#,
    )?;
    let mut acked = 0;
    for id in ids {
        acked += stmt.execute(params![
            stream,
            group,
            sql_int(id.ms),
            sql_int(id.seq)
        ])? as u64;
    }
    Ok(acked)
}

/// # Errors
///
/// `Error::NoGroup` if the group does not exist.
pub fn pending(
    conn: &Connection,
    stream: &str,
    group: &str,
) -> StoreResult<PendingSummary> {
    last_delivered(conn, stream, group)?;

    let bound = |order: &str| -> StoreResult<Option<EntryId>> {
        let id = conn
            .prepare_cached(&format!(
                r#"
                SELECT ms, seq FROM pending
                WHERE stream = ?1 AND grp = ?2
                ORDER BY ms {order}, seq {order}
                LIMIT 1"#
            ))?
            .query_row(params![stream, group], |r| {
                Ok(EntryId::new(r.get(0)?, r.get(1)?))
            })
            .optional()?;
        Ok(id)
    };
    let lowest = bound("ASC")?;
    let highest = bound("DESC")?;

    let mut stmt = conn.prepare_cached(
        r#"
        SELECT consumer, COUNT(*)
        FROM pending
        WHERE stream = ?1 AND grp = ?2
        GROUP BY consumer
        ORDER BY consumer"#,
    )?;
    let consumers = stmt
        .query_map(params![stream, group], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<(String, u64)>, _>>()?;

    Ok(PendingSummary {
        count: consumers.iter().map(|(_, n)| n).sum(),
        lowest,
        highest,
        consumers,
    })
}

/// Transfers up to `count` pending entries with ids at or after `start` that
/// have been idle for at least `min_idle_ms` to `consumer`.
///
/// # Errors
///
/// `Error::NoGroup` if the group does not exist.
#[allow(clippy::too_many_arguments)]
pub fn auto_claim(
    conn: &Connection,
    stream: &str,
    group: &str,
    consumer: &str,
    min_idle_ms: u64,
    start: EntryId,
    count: usize,
    now_ms: u64,
) -> StoreResult<AutoClaim> {
    last_delivered(conn, stream, group)?;
    touch_consumer(conn, stream, group, consumer, now_ms)?;

    let Some(cutoff) = now_ms.checked_sub(min_idle_ms) else {
        return Ok(AutoClaim::default());
    };
    let count = count.max(1);
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT ms, seq
        FROM pending
        WHERE stream = ?1 AND grp = ?2
            AND (ms, seq) >= (?3, ?4)
            AND delivered_ms <= ?5
        ORDER BY ms ASC, seq ASC
        LIMIT ?6"#,
    )?;
    let mut ids = stmt
        .query_map(
            params![
                stream,
                group,
                sql_int(start.ms),
                sql_int(start.seq),
                sql_int(cutoff),
                i64::try_from(count).unwrap_or(i64::MAX).saturating_add(1),
            ],
            |r| Ok(EntryId::new(r.get(0)?, r.get(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let next = if ids.len() > count {
        ids.pop().unwrap_or_default()
    } else {
        EntryId::MIN
    };

    let mut claimed = Vec::with_capacity(ids.len());
    for id in ids {
        redeliver(conn, stream, group, consumer, id, now_ms)?;
        if let Some(entry) = read::entry(conn, stream, id)? {
            claimed.push(entry);
        }
    }
    Ok(AutoClaim { next, claimed })
}
