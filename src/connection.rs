#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    error::{BackendError, Error, Result},
    query::Statement,
    value::{Row, Value},
};

/// Shared handle to a storage backend. Entities returned from a query keep a clone of the handle
/// they were loaded through.
pub type ConnectionRef = Arc<dyn Connection>;

/// Outcome of executing one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub affected_rows: u64,
    /// Key generated by the backend for the last inserted row, if any.
    pub insert_id: Option<Value>,
    pub rows: Vec<Row>,
    /// Backend-specific extra information.
    pub metadata: Row,
}

/// The single interface through which every generated statement is executed.
///
/// Positional parameters substitute `?` placeholders left to right.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn execute(
        &self,
        sql: &str,
        parameters: &[Value],
    ) -> std::result::Result<StatementResult, BackendError>;

    /// Begin a transaction. Backends without transaction support return `Ok(None)`.
    async fn begin_transaction(
        &self,
    ) -> std::result::Result<Option<Box<dyn Transaction>>, BackendError> {
        Ok(None)
    }
}

/// An open transaction. Exactly one of [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback) must be called before the transaction is dropped.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(
        &mut self,
        sql: &str,
        parameters: &[Value],
    ) -> std::result::Result<StatementResult, BackendError>;

    async fn commit(&mut self) -> std::result::Result<(), BackendError>;

    async fn rollback(&mut self) -> std::result::Result<(), BackendError>;
}

static DEFAULT_CONNECTION: RwLock<Option<ConnectionRef>> = RwLock::new(None);

/// Install the process-wide default connection used by [`Entity::finder`](crate::entity::Entity::finder)
/// and by entities without an attached connection. Meant to be called once at startup.
pub fn set_default_connection(connection: ConnectionRef) {
    *DEFAULT_CONNECTION
        .write()
        .unwrap_or_else(PoisonError::into_inner) = Some(connection);
}

/// Remove the process-wide default connection.
pub fn clear_default_connection() {
    DEFAULT_CONNECTION
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

#[must_use]
pub fn default_connection() -> Option<ConnectionRef> {
    DEFAULT_CONNECTION
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Pick the explicit connection if there is one, the process default otherwise.
///
/// # Errors
///
/// [`Error::NoConnection`] if neither is available.
pub fn resolve_connection(explicit: Option<&ConnectionRef>) -> Result<ConnectionRef> {
    explicit
        .cloned()
        .or_else(default_connection)
        .ok_or(Error::NoConnection)
}

/// Execute a rendered statement, wrapping backend failures with the statement that caused them.
pub(crate) async fn run(connection: &dyn Connection, statement: &Statement) -> Result<StatementResult> {
    debug!(
        sql = %statement.sql,
        parameters = statement.parameters.len(),
        "executing statement"
    );

    connection
        .execute(&statement.sql, &statement.parameters)
        .await
        .map_err(|e| Error::query(&statement.sql, &statement.parameters, e))
}

/// [`run`], inside an open transaction.
pub(crate) async fn run_in(
    transaction: &mut dyn Transaction,
    statement: &Statement,
) -> Result<StatementResult> {
    debug!(
        sql = %statement.sql,
        parameters = statement.parameters.len(),
        "executing statement in transaction"
    );

    transaction
        .execute(&statement.sql, &statement.parameters)
        .await
        .map_err(|e| Error::query(&statement.sql, &statement.parameters, e))
}

/// Run `body` inside a transaction on `connection`, committing on success and rolling back on
/// failure. A failed commit is followed by a rollback attempt before the commit error is returned.
///
/// # Errors
///
/// [`Error::TransactionsUnsupported`] if the backend cannot open a transaction, otherwise whatever
/// `body` or the commit fails with. A failing rollback is logged; the error that caused it is the
/// one returned.
pub async fn transaction<F, T>(connection: &dyn Connection, body: F) -> Result<T>
where
    F: for<'t> FnOnce(
        &'t mut dyn Transaction,
    ) -> futures::future::BoxFuture<'t, Result<T>>,
{
    let Some(mut transaction) = connection
        .begin_transaction()
        .await
        .map_err(Error::Transaction)?
    else {
        return Err(Error::TransactionsUnsupported);
    };

    match body(transaction.as_mut()).await {
        Ok(value) => {
            if let Err(e) = transaction.commit().await {
                warn!("commit failed, rolling back: {e}");
                if let Err(rollback_error) = transaction.rollback().await {
                    warn!("rollback after failed commit failed as well: {rollback_error}");
                }
                return Err(Error::Transaction(e));
            }
            Ok(value)
        }
        Err(e) => {
            warn!("rolling back transaction: {e}");
            if let Err(rollback_error) = transaction.rollback().await {
                warn!("rollback failed: {rollback_error}");
            }
            Err(e)
        }
    }
}
