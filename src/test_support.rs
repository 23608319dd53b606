//! Fixtures shared by the unit tests: hand-written entities and a connection that records every
//! statement instead of talking to a database.

#![allow(clippy::unwrap_used)]

use std::{
    collections::VecDeque,
    hash::{Hash, Hasher},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    connection::{Connection, ConnectionRef, StatementResult, Transaction},
    entity::{Entity, attributes::Attributes, hash_identity, same_identity},
    error::BackendError,
    query::Statement,
    value::{Row, Value},
};

#[derive(Debug, Default)]
pub struct User {
    attributes: Attributes,
}

impl Entity for User {
    fn table_name() -> String {
        "users".to_string()
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    fn validate(&self) -> Vec<String> {
        match self.get::<String>("name") {
            Some(name) if !name.trim().is_empty() => vec![],
            _ => vec!["name is required".to_string()],
        }
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        same_identity(self, other)
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_identity(self, state);
    }
}

#[derive(Debug, Default)]
pub struct OrderItem {
    attributes: Attributes,
}

impl Entity for OrderItem {
    fn primary_keys() -> &'static [&'static str] {
        &["order_id", "product_id"]
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

impl PartialEq for OrderItem {
    fn eq(&self, other: &Self) -> bool {
        same_identity(self, other)
    }
}

impl Eq for OrderItem {}

impl Hash for OrderItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_identity(self, state);
    }
}

#[derive(Debug, Default)]
pub struct Role {
    attributes: Attributes,
}

impl Entity for Role {
    fn table_name() -> String {
        "roles".to_string()
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

#[derive(Default)]
struct State {
    statements: Vec<Statement>,
    responses: VecDeque<StatementResult>,
    fail_on: Option<(String, Option<Value>)>,
}

/// Records statements and replays queued responses. Transactions are recorded as `BEGIN`,
/// `COMMIT` and `ROLLBACK` statements.
#[derive(Clone, Default)]
pub struct RecordingConnection {
    state: Arc<Mutex<State>>,
    transactions: bool,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            transactions: true,
        }
    }

    pub fn without_transactions() -> Self {
        Self {
            state: Arc::default(),
            transactions: false,
        }
    }

    pub fn into_ref(self) -> ConnectionRef {
        Arc::new(self)
    }

    /// Queue the result of the next statement.
    pub fn respond(&self, result: StatementResult) {
        self.state.lock().unwrap().responses.push_back(result);
    }

    pub fn respond_rows(&self, rows: Vec<Row>) {
        self.respond(StatementResult {
            rows,
            ..StatementResult::default()
        });
    }

    /// Fail every statement whose SQL contains `fragment` (and, if given, binds `parameter`).
    pub fn fail_on(&self, fragment: &str, parameter: Option<Value>) {
        self.state.lock().unwrap().fail_on = Some((fragment.to_string(), parameter));
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|e| e.sql).collect()
    }

    fn record(&self, sql: &str, parameters: &[Value]) -> Result<StatementResult, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(Statement {
            sql: sql.to_string(),
            parameters: parameters.to_vec(),
        });

        if let Some((fragment, parameter)) = &state.fail_on {
            if sql.contains(fragment.as_str())
                && parameter.as_ref().is_none_or(|p| parameters.contains(p))
            {
                return Err(format!("scripted failure for `{sql}`").into());
            }
        }

        Ok(state.responses.pop_front().unwrap_or(StatementResult {
            affected_rows: 1,
            ..StatementResult::default()
        }))
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn execute(
        &self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<StatementResult, BackendError> {
        self.record(sql, parameters)
    }

    async fn begin_transaction(&self) -> Result<Option<Box<dyn Transaction>>, BackendError> {
        if !self.transactions {
            return Ok(None);
        }

        self.record("BEGIN", &[])?;
        Ok(Some(Box::new(RecordingTransaction(self.clone()))))
    }
}

struct RecordingTransaction(RecordingConnection);

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn execute(
        &mut self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<StatementResult, BackendError> {
        self.0.record(sql, parameters)
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        self.0.record("COMMIT", &[]).map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        self.0.record("ROLLBACK", &[]).map(|_| ())
    }
}
