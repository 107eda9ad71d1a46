//! Error types for roll-caller.
//!
//! Each component owns one enum. Orchestrators (the session controller and the
//! CLI handlers) turn these into notices; nothing is retried automatically.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the persistent store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The database file could not be opened or created.
    #[error("could not open roll-call database: {0}")]
    OpenFailed(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row no longer decodes into a model value.
    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("the roster is empty")]
    EmptyRoster,
}

#[derive(Error, Debug)]
pub enum ImportError {
    /// Parsing produced no usable names.
    #[error("no valid student names found in the input")]
    Empty,

    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A default-roster candidate could not be loaded.
    #[error("could not fetch roster from {location}: {reason}")]
    Fetch { location: String, reason: String },

    #[error("import could not be saved: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("could not load records: {0}")]
    Storage(#[from] StorageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The requested action is not available in the current session state.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}
