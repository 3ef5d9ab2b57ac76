use std::{
    any::Any,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use mess_streams::{Block, Entry, EntryId, ReadFrom, ReadGroupArgs, StartId};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::StreamClient,
    driver::SubscriptionDriver,
    error::{Error, PubSubResult},
    message::Message,
};

/// Shortest wait for new entries between claim attempts.
const MIN_CLAIM_WAIT: Duration = Duration::from_millis(100);

/// How a subscription joins its consumer group.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    /// Where a newly created group starts. Ignored if the group exists.
    pub from: StartId,
    /// This consumer's name within the group.
    pub consumer: String,
    /// Deliver without adding entries to the pending list.
    pub no_ack: bool,
    /// Upper bound on entries per read.
    pub batch_size: usize,
    /// When set, entries pending at least this long are claimed before new
    /// entries are read, and a receive waiting for new entries retries the
    /// claim every `claim_min_idle` (at least every 100ms).
    ///
    /// This consumer's own unacked entries are claimable too. With a zero
    /// idle time, every receive hands back the oldest unacked entry until
    /// it is acked.
    pub claim_min_idle: Option<Duration>,
}

fn random_consumer_name() -> String {
    let suffix: String = (0..12).map(|_| fastrand::alphanumeric()).collect();
    format!("consumer-{suffix}")
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            from: StartId::Latest,
            consumer: random_consumer_name(),
            no_ack: false,
            batch_size: 1,
            claim_min_idle: None,
        }
    }
}

impl SubscriptionOptions {
    #[must_use]
    pub fn consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    #[must_use]
    pub const fn start_from(mut self, from: StartId) -> Self {
        self.from = from;
        self
    }

    #[must_use]
    pub const fn claim_min_idle(mut self, min_idle: Duration) -> Self {
        self.claim_min_idle = Some(min_idle);
        self
    }

    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }
}

/// One consumer's membership in a consumer group on a stream.
///
/// Delivery state lives in the store: an entry is pending from the read
/// that delivered it until it is acked, whether or not this subscription
/// is still open.
#[derive(Debug)]
pub struct Subscription<C> {
    client: C,
    topic: String,
    group: String,
    options: SubscriptionOptions,
    args: ReadGroupArgs,
    ready: AtomicBool,
    claim_cursor: Mutex<EntryId>,
}

impl<C: StreamClient> Subscription<C> {
    /// A subscription that is not usable until [`Subscription::bootstrap`]
    /// succeeds.
    #[must_use]
    pub fn new(
        client: C,
        group: impl Into<String>,
        topic: impl Into<String>,
        options: SubscriptionOptions,
    ) -> Self {
        let group = group.into();
        let topic = topic.into();
        let args = ReadGroupArgs::new(&topic, &group, &options.consumer)
            .read_from(ReadFrom::New)
            .count(options.batch_size.max(1))
            .block(Block::Forever)
            .no_ack(options.no_ack);
        Self {
            client,
            topic,
            group,
            options,
            args,
            ready: AtomicBool::new(false),
            claim_cursor: Mutex::new(EntryId::MIN),
        }
    }

    /// Creates the subscription and its group.
    ///
    /// # Errors
    ///
    /// Returns the store error if the group could not be created for any
    /// reason other than already existing.
    pub async fn open(
        client: C,
        group: impl Into<String>,
        topic: impl Into<String>,
        options: SubscriptionOptions,
    ) -> PubSubResult<Self> {
        let sub = Self::new(client, group, topic, options);
        sub.bootstrap().await?;
        Ok(sub)
    }

    /// Creates the group at `options.from`, along with the stream if needed.
    /// An existing group is left as it is.
    ///
    /// # Errors
    ///
    /// Returns the store error if the group could not be created for any
    /// reason other than already existing.
    pub async fn bootstrap(&self) -> PubSubResult<()> {
        match self
            .client
            .create_group(&self.topic, &self.group, self.options.from)
            .await
        {
            Ok(()) => {
                info!(
                    topic = %self.topic,
                    group = %self.group,
                    from = %self.options.from,
                    "created consumer group"
                );
            }
            Err(err) if C::is_busy_group(&err) => {
                debug!(
                    topic = %self.topic,
                    group = %self.group,
                    %err,
                    "group exists"
                );
            }
            Err(err) => {
                error!(
                    topic = %self.topic,
                    group = %self.group,
                    %err,
                    "could not create group"
                );
                return Err(Error::store(err));
            }
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.options.consumer
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The read args this subscription issues, if `T` is [`ReadGroupArgs`].
    #[must_use]
    pub fn as_raw<T: Any>(&self) -> Option<&T> {
        let raw: &dyn Any = &self.args;
        raw.downcast_ref()
    }

    /// Waits for the next message for this consumer.
    ///
    /// # Errors
    ///
    /// `Error::Canceled` if `ctx` is cancelled, `Error::NotInitialized`
    /// before bootstrap, `Error::EmptyRead` if the store answers a blocking
    /// read with nothing, otherwise the store or decode error.
    pub async fn receive_one(
        &self,
        ctx: &CancellationToken,
    ) -> PubSubResult<Message> {
        let mut msgs = self.receive(ctx, 1).await?;
        msgs.pop()
            .ok_or_else(|| Error::EmptyRead { stream: self.topic.clone() })
    }

    async fn receive(
        &self,
        ctx: &CancellationToken,
        count: usize,
    ) -> PubSubResult<Vec<Message>> {
        self.ensure_ready()?;
        if ctx.is_cancelled() {
            return Err(Error::Canceled);
        }

        let entries = match self.options.claim_min_idle {
            Some(min_idle) => self.claim_or_read(ctx, min_idle, count).await?,
            None => self.read(ctx, count, Block::Forever).await?,
        };
        if entries.is_empty() {
            error!(
                topic = %self.topic,
                group = %self.group,
                "blocking read returned nothing"
            );
            return Err(Error::EmptyRead { stream: self.topic.clone() });
        }
        self.decode(entries)
    }

    /// Decodes what it can. Undecodable entries stay pending; their error
    /// is only returned when nothing in the batch decoded.
    fn decode(&self, entries: Vec<Entry>) -> PubSubResult<Vec<Message>> {
        let mut msgs = Vec::with_capacity(entries.len());
        let mut first_err = None;
        for entry in entries {
            let id = entry.id;
            match Message::decode(entry) {
                Ok(msg) => msgs.push(msg),
                Err(err) => {
                    warn!(topic = %self.topic, %id, %err, "undecodable entry");
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) if msgs.is_empty() => Err(err),
            _ => Ok(msgs),
        }
    }

    /// Alternates claims with bounded waits for new entries so idle
    /// entries are picked up on a quiet stream.
    async fn claim_or_read(
        &self,
        ctx: &CancellationToken,
        min_idle: Duration,
        count: usize,
    ) -> PubSubResult<Vec<Entry>> {
        let wait = Block::Timeout(min_idle.max(MIN_CLAIM_WAIT));
        loop {
            let claimed = self.claim(ctx, min_idle, count).await?;
            if !claimed.is_empty() {
                return Ok(claimed);
            }
            let entries = self.read(ctx, count, wait).await?;
            if !entries.is_empty() {
                return Ok(entries);
            }
        }
    }

    async fn read(
        &self,
        ctx: &CancellationToken,
        count: usize,
        block: Block,
    ) -> PubSubResult<Vec<Entry>> {
        let adjusted;
        let args = if self.args.count == Some(count) && self.args.block == block
        {
            &self.args
        } else {
            adjusted = self.args.clone().count(count).block(block);
            &adjusted
        };
        let entries = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(Error::Canceled),
            res = self.client.read_group(args) => res.map_err(Error::store)?,
        };
        if ctx.is_cancelled() {
            return Err(Error::Canceled);
        }
        Ok(entries)
    }

    async fn claim(
        &self,
        ctx: &CancellationToken,
        min_idle: Duration,
        count: usize,
    ) -> PubSubResult<Vec<Entry>> {
        let start = *self.claim_cursor.lock();
        let claim = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(Error::Canceled),
            res = self.client.auto_claim(
                &self.topic,
                &self.group,
                &self.options.consumer,
                min_idle,
                start,
                count,
            ) => res.map_err(Error::store)?,
        };
        *self.claim_cursor.lock() = claim.next;
        if !claim.claimed.is_empty() {
            debug!(
                topic = %self.topic,
                group = %self.group,
                consumer = %self.options.consumer,
                claimed = claim.claimed.len(),
                "claimed idle entries"
            );
        }
        Ok(claim.claimed)
    }

    async fn ack_one(
        &self,
        ctx: &CancellationToken,
        id: EntryId,
    ) -> PubSubResult<u64> {
        if ctx.is_cancelled() {
            return Err(Error::Canceled);
        }
        tokio::select! {
            biased;
            () = ctx.cancelled() => Err(Error::Canceled),
            res = self.client.ack(&self.topic, &self.group, id) => {
                res.map_err(Error::store)
            }
        }
    }

    fn ensure_ready(&self) -> PubSubResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }
}

impl<C: StreamClient> SubscriptionDriver for Subscription<C> {
    /// Entries in the batch that fail to decode are logged and left
    /// pending; the rest are returned.
    async fn receive_batch(
        &self,
        ctx: &CancellationToken,
        max_messages: usize,
    ) -> PubSubResult<Vec<Message>> {
        let count = max_messages.min(self.options.batch_size).max(1);
        self.receive(ctx, count).await
    }

    async fn send_acks(
        &self,
        ctx: &CancellationToken,
        ids: &[EntryId],
    ) -> PubSubResult<()> {
        self.ensure_ready()?;
        for &id in ids {
            let acked = self.ack_one(ctx, id).await.map_err(|err| {
                warn!(
                    topic = %self.topic,
                    group = %self.group,
                    %id,
                    %err,
                    "ack failed"
                );
                Error::Ack { id, source: Box::new(err) }
            })?;
            if acked == 0 {
                debug!(
                    topic = %self.topic,
                    group = %self.group,
                    %id,
                    "ack of an entry that was not pending"
                );
            }
        }
        Ok(())
    }

    fn can_nack(&self) -> bool {
        false
    }

    async fn send_nacks(
        &self,
        _ctx: &CancellationToken,
        _ids: &[EntryId],
    ) -> PubSubResult<()> {
        panic!(
            "subscriptions cannot nack; leave entries unacked to have them \
             redelivered"
        )
    }

    fn close(&self) -> PubSubResult<()> {
        debug!(
            topic = %self.topic,
            group = %self.group,
            consumer = %self.options.consumer,
            "closed subscription"
        );
        Ok(())
    }
}
