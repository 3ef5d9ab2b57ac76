use crate::error::{Error, StoreResult};
use once_cell::sync::Lazy;
use rusqlite::{Connection, Transaction};
use tracing::{error, info};

type MigrationFn =
    Box<dyn Send + Sync + Fn(&Transaction) -> rusqlite::Result<()>>;

static MIGRATIONS: Lazy<[MigrationFn; 1]> = Lazy::new(|| {
    [
        // Migration 1 creates streams, their entries and consumer groups.
        Box::new(|tx: &Transaction| {
            tx.execute_batch(
                r#"
            CREATE TABLE streams (
                name TEXT PRIMARY KEY,
                -- last assigned id, kept even if entries go away
                last_ms INTEGER NOT NULL DEFAULT 0,
                last_seq INTEGER NOT NULL DEFAULT 0,
                entries_added INTEGER NOT NULL DEFAULT 0
            )
            STRICT;

            CREATE TABLE entries (
                stream TEXT NOT NULL REFERENCES streams (name),
                ms INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                fields TEXT NOT NULL, --JSON
                PRIMARY KEY (stream, ms, seq)
            )
            STRICT, WITHOUT ROWID;

            CREATE TABLE consumer_groups (
                stream TEXT NOT NULL REFERENCES streams (name),
                name TEXT NOT NULL,
                last_ms INTEGER NOT NULL,
                last_seq INTEGER NOT NULL,
                PRIMARY KEY (stream, name)
            )
            STRICT;

            CREATE TABLE consumers (
                stream TEXT NOT NULL,
                grp TEXT NOT NULL,
                name TEXT NOT NULL,
                seen_ms INTEGER NOT NULL,
                PRIMARY KEY (stream, grp, name),
                FOREIGN KEY (stream, grp) REFERENCES consumer_groups (stream, name)
            )
            STRICT;

            CREATE TABLE pending (
                stream TEXT NOT NULL,
                grp TEXT NOT NULL,
                ms INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                consumer TEXT NOT NULL,
                delivered_ms INTEGER NOT NULL,
                delivery_count INTEGER NOT NULL,
                PRIMARY KEY (stream, grp, ms, seq),
                FOREIGN KEY (stream, grp) REFERENCES consumer_groups (stream, name)
            )
            STRICT;

            CREATE INDEX pending_consumer
                ON pending (stream, grp, consumer, ms, seq);
        "#,
            )
        }),
        // Migration 2...
        // Box::new(|tx: &Transaction| {
        //     tx.execute("", [])?;
        //     Ok(())
        // }),
    ]
});

/// Gets PRAGMA user_version.
fn get_user_version(conn: &Connection) -> StoreResult<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Sets PRAGMA user_version = `version`.
fn set_user_version(conn: &Connection, version: i32) -> StoreResult<()> {
    Ok(conn.pragma_update(None, "user_version", version)?)
}

/// Runs the migrations which have not been run yet, updating the tracked
/// migration version in the db.
pub fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let starting_version = get_user_version(conn)?;

    for (version, migration) in MIGRATIONS
        .iter()
        .enumerate()
        .skip(usize::try_from(starting_version).unwrap_or_default())
    {
        let version = i32::try_from(version).unwrap_or(i32::MAX) + 1;
        let tx = conn.transaction()?;
        info!(version, "starting migration");

        if let Err(err) = migration(&tx) {
            let err = Error::MigrationFailed(version, err.to_string());
            error!(?err, "migration failed");
            return Err(err);
        }
        set_user_version(&tx, version)?;
        info!(version, "migration succeeded");
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use rusqlite::params;

    use crate::error::Error;

    #[fixture]
    fn test_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    mod test_user_version {
        use super::*;

        #[rstest]
        fn user_version_is_0_by_default(test_db: Connection) {
            assert_eq!(get_user_version(&test_db).unwrap(), 0);
        }

        #[rstest]
        fn set_user_version_works(test_db: Connection) {
            set_user_version(&test_db, 42).unwrap();
            assert_eq!(get_user_version(&test_db).unwrap(), 42);
        }
    }

    #[rstest]
    #[case("streams")]
    #[case("entries")]
    #[case("consumer_groups")]
    #[case("consumers")]
    #[case("pending")]
    fn creates_tables(test_db: Connection, #[case] table: &str) {
        let mut conn = test_db;
        migrate(&mut conn).unwrap();

        let rec: (String, String) = conn
            .query_row(
                r#"SELECT type, name FROM sqlite_schema
                WHERE tbl_name = ?1 AND type = 'table'"#,
                params![table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(rec, ("table".to_owned(), table.to_owned()));
    }

    #[rstest]
    fn sets_user_version(test_db: Connection) {
        let mut conn = test_db;
        migrate(&mut conn).unwrap();
        let uver = get_user_version(&conn).unwrap();
        assert_eq!(uver as usize, MIGRATIONS.len());
    }

    #[rstest]
    fn running_twice_is_a_no_op(test_db: Connection) {
        let mut conn = test_db;
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(get_user_version(&conn).unwrap() as usize, MIGRATIONS.len());
    }

    #[rstest]
    fn fails_if_table_exists(test_db: Connection) {
        let mut conn = test_db;
        conn.execute("CREATE TABLE entries (stream TEXT)", []).unwrap();

        let res = migrate(&mut conn);
        assert!(matches!(res, Err(Error::MigrationFailed(1, _))));
        assert_eq!(get_user_version(&conn).unwrap(), 0);
    }
}
