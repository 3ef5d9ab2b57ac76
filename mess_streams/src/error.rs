use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    RusqliteError(#[from] ::rusqlite::Error),

    #[error(transparent)]
    JSONError(#[from] serde_json::Error),

    #[error("database migration {0} failed: {1}")]
    MigrationFailed(i32, String),

    #[error("BUSYGROUP consumer group {group} already exists on {stream}")]
    BusyGroup { stream: String, group: String },

    #[error("NOGROUP no such stream {stream} or consumer group {group}")]
    NoGroup { stream: String, group: String },

    #[error("no such stream {stream}")]
    NoStream { stream: String },

    #[error("invalid stream id {0:?}")]
    InvalidId(String),
}

impl Error {
    /// Whether this error only reports that a group already exists. Group
    /// creation callers that want idempotent opens treat this as success.
    #[must_use]
    pub const fn is_busy_group(&self) -> bool {
        matches!(self, Self::BusyGroup { .. })
    }

    #[must_use]
    pub const fn is_no_group(&self) -> bool {
        matches!(self, Self::NoGroup { .. })
    }
}

pub type StoreResult<T> = Result<T, Error>;
