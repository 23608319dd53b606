use std::sync::Arc;

use async_trait::async_trait;
use dotenvy::dotenv;
use sqlx::{
    Column, Connection as _, Row as _, SqliteConnection, TypeInfo, ValueRef,
    sqlite::{SqliteArguments, SqliteRow},
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::{Connection, ConnectionRef, StatementResult, Transaction};
use crate::{
    error::BackendError,
    value::{Row, Value},
};

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>;

/// Attempt to retrieve the database URL from the `DATABASE_URL` environment variable, or from a
/// corresponding `.env` file.
#[must_use]
pub fn get_database_url() -> Option<String> {
    let _ = dotenv();

    std::env::var("DATABASE_URL").ok()
}

/// [`Connection`] over a single SQLite connection. Statements are serialized; an open transaction
/// holds the connection until it is committed or rolled back.
#[derive(Clone)]
pub struct SqliteBackend {
    connection: Arc<Mutex<SqliteConnection>>,
}

impl SqliteBackend {
    /// # Errors
    ///
    /// If the database cannot be opened.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let connection = SqliteConnection::connect(url).await?;
        info!(url, "connected to sqlite database");

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Connect to `DATABASE_URL`, or to a fresh in-memory database if it is unset.
    ///
    /// # Errors
    ///
    /// If the database cannot be opened.
    pub async fn connect_from_env() -> Result<Self, sqlx::Error> {
        let url = get_database_url().unwrap_or_else(|| "sqlite::memory:".to_string());
        Self::connect(&url).await
    }

    #[must_use]
    pub fn into_ref(self) -> ConnectionRef {
        Arc::new(self)
    }
}

fn bind(query: SqliteQuery<'_>, value: Value) -> SqliteQuery<'_> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(e) => query.bind(e),
        Value::Int(e) => query.bind(e),
        Value::Float(e) => query.bind(e),
        Value::Text(e) => query.bind(e),
    }
}

fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();

    ["SELECT", "WITH", "PRAGMA", "VALUES"]
        .iter()
        .any(|e| upper.starts_with(e))
        || upper.contains(" RETURNING ")
}

fn decode_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    row.columns()
        .iter()
        .map(|column| {
            let index = column.ordinal();
            let raw = row.try_get_raw(index)?;

            if raw.is_null() {
                return Ok((column.name().to_string(), Value::Null));
            }

            let type_name = raw.type_info().name().to_uppercase();
            let value = match type_name.as_str() {
                "INTEGER" | "INT" | "INT8" | "BIGINT" => Value::Int(row.try_get_unchecked(index)?),
                "REAL" | "FLOAT" | "DOUBLE" => Value::Float(row.try_get_unchecked(index)?),
                "BOOLEAN" => Value::Bool(row.try_get_unchecked(index)?),
                _ => Value::Text(row.try_get_unchecked(index)?),
            };

            Ok((column.name().to_string(), value))
        })
        .collect()
}

async fn execute_on(
    connection: &mut SqliteConnection,
    sql: &str,
    parameters: &[Value],
) -> Result<StatementResult, BackendError> {
    let query = parameters
        .iter()
        .cloned()
        .fold(sqlx::query(sql), bind);

    if returns_rows(sql) {
        let rows = query
            .fetch_all(&mut *connection)
            .await?
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;

        return Ok(StatementResult {
            affected_rows: rows.len() as u64,
            rows,
            ..StatementResult::default()
        });
    }

    let result = query.execute(&mut *connection).await?;
    let insert_id = (sql.trim_start().to_uppercase().starts_with("INSERT")
        && result.rows_affected() > 0)
        .then(|| Value::Int(result.last_insert_rowid()));

    Ok(StatementResult {
        affected_rows: result.rows_affected(),
        insert_id,
        ..StatementResult::default()
    })
}

#[async_trait]
impl Connection for SqliteBackend {
    async fn execute(
        &self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<StatementResult, BackendError> {
        let mut connection = self.connection.lock().await;
        execute_on(&mut connection, sql, parameters).await
    }

    async fn begin_transaction(&self) -> Result<Option<Box<dyn Transaction>>, BackendError> {
        let mut connection = self.connection.clone().lock_owned().await;
        sqlx::query("BEGIN").execute(&mut *connection).await?;
        debug!("transaction started");

        Ok(Some(Box::new(SqliteTransaction { connection })))
    }
}

struct SqliteTransaction {
    connection: OwnedMutexGuard<SqliteConnection>,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn execute(
        &mut self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<StatementResult, BackendError> {
        execute_on(&mut self.connection, sql, parameters).await
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        sqlx::query("COMMIT").execute(&mut *self.connection).await?;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        sqlx::query("ROLLBACK")
            .execute(&mut *self.connection)
            .await?;
        debug!("transaction rolled back");
        Ok(())
    }
}
