#![warn(clippy::missing_const_for_fn, clippy::must_use_candidate)]

pub mod client;
pub mod driver;
pub mod error;
pub mod message;
pub mod subscription;
pub mod topic;

pub use client::StreamClient;
pub use driver::{
    BatcherOptions, SubscriptionDriver, TopicDriver, RECV_BATCHER_OPTIONS,
};
pub use error::{Error, ErrorCode, PubSubResult};
pub use message::Message;
pub use subscription::{Subscription, SubscriptionOptions};
pub use topic::Topic;
