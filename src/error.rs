/*!
 * defines the [Error] and [Result] types.
*/

use thiserror::Error;

/// Floe error type
#[derive(Error, Debug)]
pub enum Error {
    /// A file's partition matches the inclusive but not the strict
    /// projection of the delete expression, and its metrics cannot prove
    /// that every row matches.
    #[error("cannot delete file where some, but not all, rows match filter {expression}: {path}")]
    CannotDeletePartial {
        /// Path of the file that can only be partially deleted.
        path: String,
        /// Display form of the delete expression.
        expression: String,
    },
    /// A delete was detected while deletes were forbidden for this update.
    #[error("cannot delete file: found matching partition {0}")]
    DeleteForbidden(String),
    /// Explicitly requested delete paths matched no file in the base snapshot.
    #[error("missing required files to delete: {}", .0.join(", "))]
    MissingDeletePaths(Vec<String>),
    /// The catalog pointer moved underneath the update; retryable.
    #[error("commit failed: table metadata changed concurrently")]
    CommitFailed,
    /// Retries were exhausted without a successful commit.
    #[error("commit failed after {0} attempts")]
    RetriesExhausted(u32),
    /// A manifest did not have the expected layout.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    /// A value did not have the expected type.
    #[error("value {0} doesn't have the {1} type")]
    Type(String, String),
    /// A column, spec, or snapshot was not found.
    #[error("{0} {1} not found")]
    NotFound(String, String),
    /// Avro error
    #[error("avro error: {0}")]
    Avro(#[from] apache_avro::Error),
    /// Serde json error
    #[error("json error: {0}")]
    JsonSerde(#[from] serde_json::Error),
    /// Io error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Object store error
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Floe result type
pub type Result<T> = std::result::Result<T, Error>;
