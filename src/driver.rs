//! The surface a generic pub/sub framework drives. Batching, retries and
//! user-facing send/receive/ack calls live in that framework.

use std::future::Future;

use mess_streams::EntryId;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, ErrorCode, PubSubResult},
    message::Message,
};

/// How the framework may batch calls into a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatcherOptions {
    pub max_batch_size: usize,
    pub max_handlers: usize,
}

/// Receives are issued one message at a time, by one handler.
pub const RECV_BATCHER_OPTIONS: BatcherOptions =
    BatcherOptions { max_batch_size: 1, max_handlers: 1 };

pub trait TopicDriver: Send + Sync {
    /// Publishes `msgs` in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// `Error::Canceled` if `ctx` is cancelled, otherwise the store error.
    fn send_batch(
        &self,
        ctx: &CancellationToken,
        msgs: &[Message],
    ) -> impl Future<Output = PubSubResult<()>> + Send;

    /// Nothing is retried at this layer.
    fn is_retryable(&self, _err: &Error) -> bool {
        false
    }

    fn error_code(&self, err: &Error) -> ErrorCode {
        err.code()
    }

    /// # Errors
    ///
    /// Implementations with resources to release report failures here.
    fn close(&self) -> PubSubResult<()> {
        Ok(())
    }
}

pub trait SubscriptionDriver: Send + Sync {
    /// Receives at least one and at most `max_messages` messages.
    ///
    /// # Errors
    ///
    /// `Error::Canceled` if `ctx` is cancelled, `Error::NotInitialized`
    /// before bootstrap, otherwise the read or decode error.
    fn receive_batch(
        &self,
        ctx: &CancellationToken,
        max_messages: usize,
    ) -> impl Future<Output = PubSubResult<Vec<Message>>> + Send;

    /// # Errors
    ///
    /// `Error::Ack` naming the first id that failed.
    fn send_acks(
        &self,
        ctx: &CancellationToken,
        ids: &[EntryId],
    ) -> impl Future<Output = PubSubResult<()>> + Send;

    fn can_nack(&self) -> bool;

    /// Only callable when [`SubscriptionDriver::can_nack`] is true.
    ///
    /// # Errors
    ///
    /// Implementations that support nacks report failures here.
    fn send_nacks(
        &self,
        ctx: &CancellationToken,
        ids: &[EntryId],
    ) -> impl Future<Output = PubSubResult<()>> + Send;

    fn is_retryable(&self, _err: &Error) -> bool {
        false
    }

    fn error_code(&self, err: &Error) -> ErrorCode {
        err.code()
    }

    /// # Errors
    ///
    /// Implementations with resources to release report failures here.
    fn close(&self) -> PubSubResult<()> {
        Ok(())
    }
}
