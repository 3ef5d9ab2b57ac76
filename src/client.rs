use std::{error::Error as StdError, future::Future, sync::Arc, time::Duration};

use mess_streams::{
    clock::Clock, error::Error as StoreError, AutoClaim, Entry, EntryId, Fields,
    ReadGroupArgs, StartId, Store,
};

/// The stream operations the publisher and subscription need.
///
/// Errors are reported as-is; callers wrap them without retrying.
pub trait StreamClient: Send + Sync {
    type Error: StdError + Send + Sync + 'static;

    /// Appends an entry with a store-assigned id.
    fn append(
        &self,
        stream: &str,
        fields: &Fields,
    ) -> impl Future<Output = Result<EntryId, Self::Error>> + Send;

    /// Creates `group` on `stream` at `start`, creating the stream if it is
    /// missing.
    fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartId,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether `err` is the "group already exists" failure.
    fn is_busy_group(err: &Self::Error) -> bool;

    fn read_group(
        &self,
        args: &ReadGroupArgs,
    ) -> impl Future<Output = Result<Vec<Entry>, Self::Error>> + Send;

    fn ack(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: EntryId,
        count: usize,
    ) -> impl Future<Output = Result<AutoClaim, Self::Error>> + Send;
}

impl<C: Clock + Send + Sync> StreamClient for Store<C> {
    type Error = StoreError;

    async fn append(
        &self,
        stream: &str,
        fields: &Fields,
    ) -> Result<EntryId, StoreError> {
        Self::append(self, stream, fields)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartId,
    ) -> Result<(), StoreError> {
        Self::create_group(self, stream, group, start, true).map(|_| ())
    }

    fn is_busy_group(err: &StoreError) -> bool {
        err.is_busy_group()
    }

    async fn read_group(
        &self,
        args: &ReadGroupArgs,
    ) -> Result<Vec<Entry>, StoreError> {
        Self::read_group(self, args).await
    }

    async fn ack(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<u64, StoreError> {
        Self::ack(self, stream, group, &[id])
    }

    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: EntryId,
        count: usize,
    ) -> Result<AutoClaim, StoreError> {
        Self::auto_claim(self, stream, group, consumer, min_idle, start, count)
    }
}

impl<T: StreamClient> StreamClient for Arc<T> {
    type Error = T::Error;

    fn append(
        &self,
        stream: &str,
        fields: &Fields,
    ) -> impl Future<Output = Result<EntryId, Self::Error>> + Send {
        (**self).append(stream, fields)
    }

    fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartId,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        (**self).create_group(stream, group, start)
    }

    fn is_busy_group(err: &Self::Error) -> bool {
        T::is_busy_group(err)
    }

    fn read_group(
        &self,
        args: &ReadGroupArgs,
    ) -> impl Future<Output = Result<Vec<Entry>, Self::Error>> + Send {
        (**self).read_group(args)
    }

    fn ack(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send {
        (**self).ack(stream, group, id)
    }

    fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: EntryId,
        count: usize,
    ) -> impl Future<Output = Result<AutoClaim, Self::Error>> + Send {
        (**self).auto_claim(stream, group, consumer, min_idle, start, count)
    }
}

/// A scripted client for exercising the driver without a store.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashSet;

    use parking_lot::Mutex;

    use super::*;

    /// Reads come back empty unless entries were queued. Any operation can
    /// be made to fail with `NoGroup`.
    #[derive(Debug, Default)]
    pub(crate) struct FakeClient {
        pub existing_group: bool,
        pub missing_stream: bool,
        pub failing_appends: bool,
        pub failing_reads: bool,
        pub failing_acks: HashSet<EntryId>,
        pub queued: Mutex<Vec<Entry>>,
        pub acked: Mutex<Vec<EntryId>>,
    }

    fn no_group(stream: &str, group: &str) -> StoreError {
        StoreError::NoGroup { stream: stream.into(), group: group.into() }
    }

    impl StreamClient for FakeClient {
        type Error = StoreError;

        async fn append(
            &self,
            stream: &str,
            _: &Fields,
        ) -> Result<EntryId, StoreError> {
            if self.failing_appends {
                return Err(no_group(stream, "-"));
            }
            Ok(EntryId::new(1, 0))
        }

        async fn create_group(
            &self,
            stream: &str,
            group: &str,
            _: StartId,
        ) -> Result<(), StoreError> {
            if self.missing_stream {
                return Err(StoreError::NoStream { stream: stream.into() });
            }
            if self.existing_group {
                return Err(StoreError::BusyGroup {
                    stream: stream.into(),
                    group: group.into(),
                });
            }
            Ok(())
        }

        fn is_busy_group(err: &StoreError) -> bool {
            err.is_busy_group()
        }

        async fn read_group(
            &self,
            args: &ReadGroupArgs,
        ) -> Result<Vec<Entry>, StoreError> {
            if self.failing_reads {
                return Err(no_group(&args.stream, &args.group));
            }
            Ok(std::mem::take(&mut *self.queued.lock()))
        }

        async fn ack(
            &self,
            stream: &str,
            group: &str,
            id: EntryId,
        ) -> Result<u64, StoreError> {
            if self.failing_acks.contains(&id) {
                return Err(no_group(stream, group));
            }
            self.acked.lock().push(id);
            Ok(1)
        }

        async fn auto_claim(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: Duration,
            _: EntryId,
            _: usize,
        ) -> Result<AutoClaim, StoreError> {
            Ok(AutoClaim::default())
        }
    }
}
