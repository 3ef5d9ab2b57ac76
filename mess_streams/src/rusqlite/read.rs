use rusqlite::{params, Connection, OptionalExtension};

use super::{entry_from_row, group, sql_int, sql_limit};
use crate::{
    error::StoreResult, Entry, EntryId, ReadFrom, ReadGroupArgs,
};

/// Last id assigned in `stream`, or `None` if the stream does not exist.
pub fn last_id(conn: &Connection, stream: &str) -> StoreResult<Option<EntryId>> {
    let id = conn
        .prepare_cached(
            "SELECT last_ms, last_seq FROM streams WHERE name = ?1",
        )?
        .query_row(params![stream], |r| {
            Ok(EntryId::new(r.get(0)?, r.get(1)?))
        })
        .optional()?;
    Ok(id)
}

pub fn len(conn: &Connection, stream: &str) -> StoreResult<u64> {
    let n = conn
        .prepare_cached("SELECT COUNT(*) FROM entries WHERE stream = ?1")?
        .query_row(params![stream], |r| r.get(0))?;
    Ok(n)
}

/// Entries with `start <= id <= end`, in id order.
pub fn range(
    conn: &Connection,
    stream: &str,
    start: EntryId,
    end: EntryId,
    count: Option<usize>,
) -> StoreResult<Vec<Entry>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT ms, seq, fields
        FROM entries
        WHERE stream = ?1
            AND (ms, seq) >= (?2, ?3)
            AND (ms, seq) <= (?4, ?5)
        ORDER BY ms ASC, seq ASC
        LIMIT ?6"#,
    )?;
    let entries = stmt
        .query_and_then(
            params![
                stream,
                sql_int(start.ms),
                sql_int(start.seq),
                sql_int(end.ms),
                sql_int(end.seq),
                sql_limit(count),
            ],
            entry_from_row,
        )?
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(entries)
}

/// Entries with ids strictly greater than `after`, in id order.
pub(crate) fn entries_after(
    conn: &Connection,
    stream: &str,
    after: EntryId,
    count: Option<usize>,
) -> StoreResult<Vec<Entry>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT ms, seq, fields
        FROM entries
        WHERE stream = ?1 AND (ms, seq) > (?2, ?3)
        ORDER BY ms ASC, seq ASC
        LIMIT ?4"#,
    )?;
    let entries = stmt
        .query_and_then(
            params![
                stream,
                sql_int(after.ms),
                sql_int(after.seq),
                sql_limit(count)
            ],
            entry_from_row,
        )?
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(entries)
}

pub(crate) fn entry(
    conn: &Connection,
    stream: &str,
    id: EntryId,
) -> StoreResult<Option<Entry>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT ms, seq, fields
        FROM entries
        WHERE stream = ?1 AND ms = ?2 AND seq = ?3"#,
    )?;
    let entry = stmt
        .query_and_then(
            params![stream, sql_int(id.ms), sql_int(id.seq)],
            entry_from_row,
        )?
        .next()
        .transpose();
    entry
}

/// A single, non-blocking group read. Run inside a transaction.
///
/// Reading `ReadFrom::New` hands out entries past the group's last
/// delivered id, moves that id forward and, unless `no_ack` is set, records
/// the entries as pending for the reading consumer. Reading
/// `ReadFrom::Pending` re-delivers the consumer's own pending entries.
///
/// # Errors
///
/// `Error::NoGroup` if the group does not exist.
pub fn read_group(
    conn: &Connection,
    args: &ReadGroupArgs,
    now_ms: u64,
) -> StoreResult<Vec<Entry>> {
    let last_delivered =
        group::last_delivered(conn, &args.stream, &args.group)?;
    group::touch_consumer(
        conn,
        &args.stream,
        &args.group,
        &args.consumer,
        now_ms,
    )?;

    match args.from {
        ReadFrom::New => {
            let entries =
                entries_after(conn, &args.stream, last_delivered, args.count)?;
            let Some(last) = entries.last() else {
                return Ok(entries);
            };
            group::set_last_delivered(
                conn,
                &args.stream,
                &args.group,
                last.id,
            )?;
            if !args.no_ack {
                for entry in &entries {
                    group::add_pending(
                        conn,
                        &args.stream,
                        &args.group,
                        &args.consumer,
                        entry.id,
                        now_ms,
                    )?;
                }
            }
            Ok(entries)
        }
        ReadFrom::Pending(after) => {
            let mut stmt = conn.prepare_cached(
                r#"
                SELECT e.ms, e.seq, e.fields
                FROM pending p
                JOIN entries e
                    ON e.stream = p.stream AND e.ms = p.ms AND e.seq = p.seq
                WHERE p.stream = ?1 AND p.grp = ?2 AND p.consumer = ?3
                    AND (p.ms, p.seq) > (?4, ?5)
                ORDER BY p.ms ASC, p.seq ASC
                LIMIT ?6"#,
            )?;
            let entries = stmt
                .query_and_then(
                    params![
                        args.stream,
                        args.group,
                        args.consumer,
                        sql_int(after.ms),
                        sql_int(after.seq),
                        sql_limit(args.count),
                    ],
                    entry_from_row,
                )?
                .collect::<StoreResult<Vec<_>>>()?;
            for entry in &entries {
                group::redeliver(
                    conn,
                    &args.stream,
                    &args.group,
                    &args.consumer,
                    entry.id,
                    now_ms,
                )?;
            }
            Ok(entries)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::Error,
        rusqlite::{
            group::{create_group, pending},
            test::new_memory_conn_with_migrations,
            write::append,
        },
        Fields, StartId,
    };
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn test_db(entries: usize) -> Connection {
        let conn = new_memory_conn_with_migrations();
        for i in 0..entries {
            let fields = Fields::new().with("body", format!("{i}"));
            append(&conn, "stream1", &fields, 100).unwrap();
        }
        conn
    }

    fn bodies(entries: &[Entry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| String::from_utf8(e.fields.get("body").unwrap().to_vec()))
            .collect::<Result<_, _>>()
            .unwrap()
    }

    mod fn_range {
        use super::*;

        #[rstest]
        fn it_is_inclusive_on_both_ends() {
            let conn = test_db(5);
            let entries = range(
                &conn,
                "stream1",
                EntryId::new(100, 1),
                EntryId::new(100, 3),
                None,
            )
            .unwrap();
            assert_eq!(bodies(&entries), ["1", "2", "3"]);
        }

        #[rstest]
        fn it_honors_count() {
            let conn = test_db(5);
            let entries =
                range(&conn, "stream1", EntryId::MIN, EntryId::MAX, Some(2))
                    .unwrap();
            assert_eq!(bodies(&entries), ["0", "1"]);
        }

        #[rstest]
        fn it_returns_nothing_for_missing_streams() {
            let conn = test_db(5);
            let entries =
                range(&conn, "nope", EntryId::MIN, EntryId::MAX, None).unwrap();
            assert!(entries.is_empty());
            assert_eq!(len(&conn, "nope").unwrap(), 0);
            assert_eq!(last_id(&conn, "nope").unwrap(), None);
        }
    }

    mod fn_read_group {
        use super::*;

        #[rstest]
        fn it_requires_a_group() {
            let conn = test_db(1);
            let args = ReadGroupArgs::new("stream1", "g", "c");
            let err = read_group(&conn, &args, 100).unwrap_err();
            assert!(err.is_no_group(), "{err:?}");
        }

        #[rstest]
        fn it_delivers_new_entries_in_order_one_at_a_time() {
            let conn = test_db(3);
            create_group(&conn, "stream1", "g", StartId::Id(EntryId::MIN), false)
                .unwrap();
            let args = ReadGroupArgs::new("stream1", "g", "c").count(1);
            let mut seen = vec![];
            for _ in 0..4 {
                seen.extend(read_group(&conn, &args, 200).unwrap());
            }
            assert_eq!(bodies(&seen), ["0", "1", "2"]);
            assert_eq!(pending(&conn, "stream1", "g").unwrap().count, 3);
        }

        #[rstest]
        fn latest_groups_skip_existing_entries() {
            let conn = test_db(3);
            create_group(&conn, "stream1", "g", StartId::Latest, false).unwrap();
            let args = ReadGroupArgs::new("stream1", "g", "c");
            assert!(read_group(&conn, &args, 200).unwrap().is_empty());

            append(&conn, "stream1", &Fields::new().with("body", "new"), 300)
                .unwrap();
            let entries = read_group(&conn, &args, 300).unwrap();
            assert_eq!(bodies(&entries), ["new"]);
        }

        #[rstest]
        fn no_ack_reads_leave_nothing_pending() {
            let conn = test_db(2);
            create_group(&conn, "stream1", "g", StartId::Id(EntryId::MIN), false)
                .unwrap();
            let args = ReadGroupArgs::new("stream1", "g", "c").no_ack(true);
            assert_eq!(read_group(&conn, &args, 200).unwrap().len(), 2);
            assert_eq!(pending(&conn, "stream1", "g").unwrap().count, 0);
        }

        #[rstest]
        fn groups_have_independent_cursors() {
            let conn = test_db(2);
            for g in ["g1", "g2"] {
                create_group(&conn, "stream1", g, StartId::Id(EntryId::MIN), false)
                    .unwrap();
            }
            let g1 = ReadGroupArgs::new("stream1", "g1", "c");
            let g2 = ReadGroupArgs::new("stream1", "g2", "c");
            assert_eq!(bodies(&read_group(&conn, &g1, 200).unwrap()), ["0", "1"]);
            assert_eq!(bodies(&read_group(&conn, &g2, 200).unwrap()), ["0", "1"]);
        }

        #[rstest]
        fn pending_reads_return_only_the_consumers_own_entries() {
            let conn = test_db(3);
            create_group(&conn, "stream1", "g", StartId::Id(EntryId::MIN), false)
                .unwrap();
            let c1 = ReadGroupArgs::new("stream1", "g", "c1").count(2);
            let c2 = ReadGroupArgs::new("stream1", "g", "c2").count(1);
            read_group(&conn, &c1, 200).unwrap();
            read_group(&conn, &c2, 200).unwrap();

            let history = c1.clone().read_from(ReadFrom::Pending(EntryId::MIN));
            assert_eq!(bodies(&read_group(&conn, &history, 300).unwrap()), ["0", "1"]);

            let after_first =
                c1.read_from(ReadFrom::Pending(EntryId::new(100, 0)));
            assert_eq!(bodies(&read_group(&conn, &after_first, 300).unwrap()), ["1"]);
        }

        #[rstest]
        fn missing_stream_is_no_group() {
            let conn = test_db(0);
            let args = ReadGroupArgs::new("ghost", "g", "c");
            assert!(matches!(
                read_group(&conn, &args, 0),
                Err(Error::NoGroup { .. })
            ));
        }
    }
}
