use rusqlite::{params, Connection};

use super::{read::last_id, sql_int};
use crate::{error::StoreResult, EntryId, Fields};

/// The id an append made at `now_ms` gets when the stream's last id is
/// `last`. Ids never go backwards, even if the clock does.
pub(crate) const fn next_id(last: EntryId, now_ms: u64) -> EntryId {
    if now_ms > last.ms {
        EntryId::new(now_ms, 0)
    } else {
        last.next()
    }
}

/// Records the stream if it does not exist yet. Returns its last id.
pub(crate) fn ensure_stream(
    conn: &Connection,
    stream: &str,
) -> StoreResult<EntryId> {
    if let Some(last) = last_id(conn, stream)? {
        return Ok(last);
    }
    conn.prepare_cached("INSERT INTO streams (name) VALUES (?1)")?
        .execute(params![stream])?;
    Ok(EntryId::MIN)
}

/// Appends `fields` to `stream` with a server-assigned id, creating the
/// stream on first use. Run inside a transaction.
pub fn append(
    conn: &Connection,
    stream: &str,
    fields: &Fields,
    now_ms: u64,
) -> StoreResult<EntryId> {
    let last = ensure_stream(conn, stream)?;
    let id = next_id(last, now_ms);
    let fields = serde_json::to_string(fields)?;

    conn.prepare_cached(
        r#"
        INSERT INTO entries (stream, ms, seq, fields)
        VALUES (?1, ?2, ?3, ?4)"#,
    )?
    .execute(params![stream, sql_int(id.ms), sql_int(id.seq), fields])?;
    conn.prepare_cached(
        r#"
        UPDATE streams
        SET last_ms = ?2, last_seq = ?3, entries_added = entries_added + 1
        WHERE name = ?1"#,
    )?
    .execute(params![stream, sql_int(id.ms), sql_int(id.seq)])?;

    Ok(id)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rusqlite::test::new_memory_conn_with_migrations;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::*;

    #[fixture]
    fn test_db() -> Connection {
        new_memory_conn_with_migrations()
    }

    mod fn_next_id {
        use super::*;

        #[rstest]
        fn it_uses_the_clock_when_it_moved_forward() {
            assert_eq!(next_id(EntryId::new(5, 3), 9), EntryId::new(9, 0));
        }

        #[rstest]
        fn it_bumps_seq_within_the_same_ms() {
            assert_eq!(next_id(EntryId::new(5, 3), 5), EntryId::new(5, 4));
        }

        #[rstest]
        fn it_never_goes_backwards() {
            assert_eq!(next_id(EntryId::new(5, 3), 1), EntryId::new(5, 4));
        }

        #[rstest]
        fn it_never_assigns_0_0() {
            assert_eq!(next_id(EntryId::MIN, 0), EntryId::new(0, 1));
        }

        proptest! {
            #[test]
            fn ids_strictly_increase_whatever_the_clock_does(
                clocks in prop::collection::vec(0u64..1_000_000, 1..64),
            ) {
                let mut last = EntryId::MIN;
                for now_ms in clocks {
                    let id = next_id(last, now_ms);
                    prop_assert!(id > last, "{id} after {last} at {now_ms}");
                    last = id;
                }
            }
        }
    }

    mod fn_append {
        use super::*;

        #[rstest]
        fn it_writes_entries(test_db: Connection) {
            let fields = Fields::new().with("body", "hi");
            let id = append(&test_db, "topics/1", &fields, 1_000).unwrap();
            assert_eq!(id, EntryId::new(1_000, 0));

            let (ms, seq, stored): (i64, i64, String) = test_db
                .query_row(
                    "SELECT ms, seq, fields FROM entries WHERE stream = ?1",
                    params!["topics/1"],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .unwrap();
            assert_eq!((ms, seq), (1_000, 0));
            let stored: Fields = serde_json::from_str(&stored).unwrap();
            assert_eq!(stored, fields);
        }

        #[rstest]
        fn it_tracks_the_last_id(test_db: Connection) {
            let fields = Fields::new().with("body", "x");
            append(&test_db, "s", &fields, 10).unwrap();
            append(&test_db, "s", &fields, 10).unwrap();
            let last = append(&test_db, "s", &fields, 10).unwrap();
            assert_eq!(last, EntryId::new(10, 2));
            assert_eq!(last_id(&test_db, "s").unwrap(), Some(last));
        }

        #[rstest]
        fn streams_are_independent(test_db: Connection) {
            let fields = Fields::new();
            append(&test_db, "a", &fields, 10).unwrap();
            let b = append(&test_db, "b", &fields, 10).unwrap();
            assert_eq!(b, EntryId::new(10, 0));
        }
    }
}
