use std::error::Error as StdError;

use mess_streams::EntryId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("operation canceled")]
    Canceled,

    #[error("subscription is not initialized")]
    NotInitialized,

    #[error("group read on {stream} returned no entries")]
    EmptyRead { stream: String },

    #[error("entry {id} has no {field} field")]
    MissingField { id: EntryId, field: &'static str },

    #[error("entry {id} has malformed headers: {source}")]
    MalformedHeaders {
        id: EntryId,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    #[error("ack id {id} error: {source}")]
    Ack {
        id: EntryId,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Store(Box<dyn StdError + Send + Sync>),
}

/// Coarse status of an operation, as seen by whatever wraps the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    Canceled,
    NotFound,
    Unknown,
}

impl ErrorCode {
    /// ```
    /// use mess_pubsub::error::{Error, ErrorCode};
    ///
    /// assert_eq!(ErrorCode::of(&Ok::<_, Error>(())), ErrorCode::Ok);
    /// let canceled = Err::<(), _>(Error::Canceled);
    /// assert_eq!(ErrorCode::of(&canceled), ErrorCode::Canceled);
    /// ```
    #[must_use]
    pub fn of<T>(res: &Result<T, Error>) -> Self {
        match res {
            Ok(_) => Self::Ok,
            Err(err) => err.code(),
        }
    }
}

impl Error {
    pub fn store(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Store(Box::new(err))
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Canceled => ErrorCode::Canceled,
            Self::NotInitialized => ErrorCode::NotFound,
            Self::Ack { source, .. } => source.code(),
            _ => ErrorCode::Unknown,
        }
    }

    /// The store error this error wraps, if it is an `E`.
    ///
    /// ```
    /// use mess_pubsub::error::Error;
    /// use mess_streams::error::Error as StoreError;
    ///
    /// let err = Error::store(StoreError::NoStream { stream: "s".into() });
    /// assert!(matches!(
    ///     err.store_error::<StoreError>(),
    ///     Some(StoreError::NoStream { .. })
    /// ));
    /// assert!(err.store_error::<std::io::Error>().is_none());
    /// ```
    #[must_use]
    pub fn store_error<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Store(err) => err.downcast_ref::<E>(),
            Self::Ack { source, .. } => source.store_error(),
            _ => None,
        }
    }
}

pub type PubSubResult<T> = Result<T, Error>;
