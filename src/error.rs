use itertools::Itertools;
use thiserror::Error as ThisError;

use crate::value::Value;

/// Error type returned by storage adapters implementing [`Connection`](crate::connection::Connection).
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Neither an explicit connection nor a process default connection is available.
    #[error(
        "no connection available, attach one to the entity or install a default with `set_default_connection`"
    )]
    NoConnection,

    #[error("model `{0}` is not registered with the type registry")]
    ModelNotRegistered(&'static str),

    #[error("entity `{0}` declares no primary key columns")]
    EmptyPrimaryKey(&'static str),

    #[error("invalid state: {0}")]
    State(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("the connection does not support transactions")]
    TransactionsUnsupported,

    #[error("invalid argument: {0}")]
    Argument(String),

    /// `validate()` returned one or more messages.
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    /// The backend failed to execute a generated statement.
    #[error("query failed: {source} [sql: {sql}] [parameters: {}]", .parameters.iter().join(", "))]
    Query {
        sql: String,
        parameters: Vec<Value>,
        #[source]
        source: BackendError,
    },

    #[error("transaction failed: {0}")]
    Transaction(#[source] BackendError),

    #[error("no `{0}` row matched the query")]
    NotFound(String),
}

impl Error {
    pub(crate) fn query(sql: &str, parameters: &[Value], source: BackendError) -> Self {
        Self::Query {
            sql: sql.to_string(),
            parameters: parameters.to_vec(),
            source,
        }
    }

    /// Whether this error carries the validation messages produced by an entity.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
