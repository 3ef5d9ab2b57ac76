use mess_streams::EntryId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::StreamClient,
    driver::TopicDriver,
    error::{Error, PubSubResult},
    message::Message,
};

/// Publishes messages to one stream.
#[derive(Debug, Clone)]
pub struct Topic<C> {
    client: C,
    name: String,
}

impl<C: StreamClient> Topic<C> {
    #[must_use]
    pub fn new(client: C, name: impl Into<String>) -> Self {
        Self { client, name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends `msg` and returns the id the store assigned to it.
    ///
    /// # Errors
    ///
    /// `Error::Canceled` if `ctx` is cancelled before the append completes,
    /// otherwise the store error unchanged.
    pub async fn send(
        &self,
        ctx: &CancellationToken,
        msg: &Message,
    ) -> PubSubResult<EntryId> {
        if ctx.is_cancelled() {
            return Err(Error::Canceled);
        }
        let fields = msg.encode()?;
        let id = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(Error::Canceled),
            res = self.client.append(&self.name, &fields) => {
                res.map_err(|err| {
                    warn!(topic = %self.name, %err, "publish failed");
                    Error::store(err)
                })?
            }
        };
        debug!(topic = %self.name, %id, "published message");
        Ok(id)
    }
}

impl<C: StreamClient> TopicDriver for Topic<C> {
    async fn send_batch(
        &self,
        ctx: &CancellationToken,
        msgs: &[Message],
    ) -> PubSubResult<()> {
        for msg in msgs {
            self.send(ctx, msg).await?;
        }
        Ok(())
    }
}
