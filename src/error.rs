use thiserror::Error;

#[derive(Error, Debug)]
pub enum FieldscribeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Browser or driver unavailable, bind failure, command timeout.
    /// Fatal: surfaced immediately, never retried.
    #[error("Environment not ready: {0}")]
    Environment(String),

    /// A page operation through the driver failed.
    #[error("Driver error: {0}")]
    Driver(String),

    /// The field id is not in the current scan's descriptor set.
    #[error("Unknown field {0}: run scan first")]
    NotFound(String),

    /// The element vanished from the page since the last scan.
    #[error("Field {0} is gone from the page: run scan again")]
    Gone(String),

    /// Both the programmatic set and the keystroke fallback are exhausted
    /// for this attempt. Terminal; no further workaround is attempted.
    #[error("Insertion blocked: {0}")]
    InsertionBlocked(String),

    /// Normal terminal state, not a fault: there is nothing to undo.
    #[error("Nothing to undo for field {0}")]
    NoUndoAvailable(String),
}

pub type Result<T> = std::result::Result<T, FieldscribeError>;
