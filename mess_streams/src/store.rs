use std::{path::Path, time::Duration};

use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, info};

use crate::{
    clock::{Clock, SystemClock},
    error::StoreResult,
    rusqlite::{group, migration, read, write},
    AutoClaim, Block, Entry, EntryId, Fields, PendingSummary, ReadFrom,
    ReadGroupArgs, StartId,
};

/// An append-only stream store with consumer groups.
///
/// All access goes through a single connection. Blocked group reads are
/// woken by appends made through the same `Store`; appends made by another
/// process to the same file are only seen on the next read attempt.
#[derive(Debug)]
pub struct Store<C = SystemClock> {
    conn: Mutex<Connection>,
    appended: Notify,
    clock: C,
}

impl Store<SystemClock> {
    /// Opens (or creates) a store at `path` and migrates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening stream store");
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_clock(conn, SystemClock)
    }

    /// # Errors
    ///
    /// Returns an error if the database cannot be migrated.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_clock(Connection::open_in_memory()?, SystemClock)
    }
}

impl<C: Clock> Store<C> {
    /// Wraps an open connection, migrating it first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be migrated.
    pub fn with_clock(mut conn: Connection, clock: C) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "temp_store", "memory")?;
        migration::migrate(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn), appended: Notify::new(), clock })
    }

    /// # Errors
    ///
    /// Returns an error if the database cannot be migrated.
    pub fn open_in_memory_with_clock(clock: C) -> StoreResult<Self> {
        Self::with_clock(Connection::open_in_memory()?, clock)
    }

    /// Appends an entry and wakes any blocked group reads.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failures.
    pub fn append(
        &self,
        stream: &str,
        fields: &Fields,
    ) -> StoreResult<EntryId> {
        let id = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let now_ms = self.clock.now_millis();
            let id = write::append(&tx, stream, fields, now_ms)?;
            tx.commit()?;
            id
        };
        debug!(stream, %id, "appended entry");
        self.appended.notify_waiters();
        Ok(id)
    }

    /// # Errors
    ///
    /// `Error::BusyGroup` if the group already exists, `Error::NoStream` if
    /// the stream is missing and `mkstream` is false.
    pub fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartId,
        mkstream: bool,
    ) -> StoreResult<EntryId> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let start = group::create_group(&tx, stream, group, start, mkstream)?;
        tx.commit()?;
        info!(stream, group, %start, "created consumer group");
        Ok(start)
    }

    /// One group read attempt that never waits.
    ///
    /// # Errors
    ///
    /// `Error::NoGroup` if the group does not exist.
    pub fn try_read_group(
        &self,
        args: &ReadGroupArgs,
    ) -> StoreResult<Vec<Entry>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let entries = read::read_group(&tx, args, self.clock.now_millis())?;
        tx.commit()?;
        Ok(entries)
    }

    /// Group read that waits for new entries according to `args.block`.
    /// Only `ReadFrom::New` reads wait. A timed out wait returns no entries.
    ///
    /// # Errors
    ///
    /// `Error::NoGroup` if the group does not exist.
    pub async fn read_group(
        &self,
        args: &ReadGroupArgs,
    ) -> StoreResult<Vec<Entry>> {
        let deadline = match args.block {
            Block::Timeout(timeout) => Some(Instant::now() + timeout),
            Block::No | Block::Forever => None,
        };
        loop {
            // Register before reading so an append between the read and the
            // wait is not missed.
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let entries = self.try_read_group(args)?;
            if !entries.is_empty()
                || args.block == Block::No
                || matches!(args.from, ReadFrom::Pending(_))
            {
                return Ok(entries);
            }

            match deadline {
                None => appended.await,
                Some(deadline) => {
                    let woken =
                        tokio::time::timeout_at(deadline, appended).await;
                    if woken.is_err() {
                        return Ok(entries);
                    }
                }
            }
        }
    }

    /// # Errors
    ///
    /// `Error::NoGroup` if the group does not exist.
    pub fn ack(
        &self,
        stream: &str,
        group: &str,
        ids: &[EntryId],
    ) -> StoreResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let acked = group::ack(&tx, stream, group, ids)?;
        tx.commit()?;
        Ok(acked)
    }

    /// # Errors
    ///
    /// `Error::NoGroup` if the group does not exist.
    pub fn pending(
        &self,
        stream: &str,
        group: &str,
    ) -> StoreResult<PendingSummary> {
        group::pending(&self.conn.lock(), stream, group)
    }

    /// # Errors
    ///
    /// `Error::NoGroup` if the group does not exist.
    pub fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: EntryId,
        count: usize,
    ) -> StoreResult<AutoClaim> {
        let min_idle_ms =
            u64::try_from(min_idle.as_millis()).unwrap_or(u64::MAX);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let claim = group::auto_claim(
            &tx,
            stream,
            group,
            consumer,
            min_idle_ms,
            start,
            count,
            self.clock.now_millis(),
        )?;
        tx.commit()?;
        if !claim.claimed.is_empty() {
            debug!(
                stream,
                group,
                consumer,
                claimed = claim.claimed.len(),
                "claimed idle pending entries"
            );
        }
        Ok(claim)
    }

    /// # Errors
    ///
    /// Returns an error on storage failures.
    pub fn range(
        &self,
        stream: &str,
        start: EntryId,
        end: EntryId,
        count: Option<usize>,
    ) -> StoreResult<Vec<Entry>> {
        read::range(&self.conn.lock(), stream, start, end, count)
    }

    /// # Errors
    ///
    /// Returns an error on storage failures.
    pub fn len(&self, stream: &str) -> StoreResult<u64> {
        read::len(&self.conn.lock(), stream)
    }

    /// # Errors
    ///
    /// Returns an error on storage failures.
    pub fn last_id(&self, stream: &str) -> StoreResult<Option<EntryId>> {
        read::last_id(&self.conn.lock(), stream)
    }
}
