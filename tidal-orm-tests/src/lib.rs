//! Shared fixtures for the integration tests: a handful of derived entities and a fresh in-memory
//! SQLite database per test.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tidal_orm::{
    connection::{
        Connection, ConnectionRef, StatementResult, Transaction, sqlite::SqliteBackend,
    },
    error::BackendError,
    registry,
    value::Value,
};

pub mod user {
    use tidal_orm::{Entity, entity::Entity as _, entity::attributes::Attributes};

    #[derive(Debug, Default, Entity)]
    #[tidal_orm(table = "users", validate = "validate_user")]
    pub struct User {
        attributes: Attributes,
    }

    fn validate_user(user: &User) -> Vec<String> {
        let mut errors = vec![];

        if user
            .get::<String>("name")
            .is_none_or(|e| e.trim().is_empty())
        {
            errors.push("name is required".to_string());
        }
        if user.get::<i64>("age").is_some_and(|e| e < 0) {
            errors.push("age must not be negative".to_string());
        }

        errors
    }
}

pub mod role {
    use tidal_orm::{Entity, entity::attributes::Attributes};

    #[derive(Debug, Default, Entity)]
    #[tidal_orm(table = "roles")]
    pub struct Role {
        attributes: Attributes,
    }
}

pub mod profile {
    use tidal_orm::{Entity, entity::attributes::Attributes};

    #[derive(Debug, Default, Entity)]
    #[tidal_orm(table = "profiles")]
    pub struct Profile {
        #[tidal_orm(attributes)]
        store: Attributes,
    }
}

pub mod post {
    use tidal_orm::{Entity, entity::attributes::Attributes};

    #[derive(Debug, Default, Entity)]
    #[tidal_orm(table = "posts")]
    pub struct Post {
        attributes: Attributes,
    }
}

pub mod order_item {
    use tidal_orm::{Entity, entity::attributes::Attributes};

    /// Table name derived from the type name.
    #[derive(Debug, Default, Entity)]
    #[tidal_orm(primary_key(order_id, product_id))]
    pub struct OrderItem {
        attributes: Attributes,
    }
}

pub use order_item::OrderItem;
pub use post::Post;
pub use profile::Profile;
pub use role::Role;
pub use user::User;

const SCHEMA: &[&str] = &[
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT,
        age INTEGER,
        active BOOLEAN,
        role_id INTEGER
    )",
    "CREATE TABLE roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL
    )",
    "CREATE TABLE role_user (
        user_id INTEGER NOT NULL,
        role_id INTEGER NOT NULL CHECK (role_id < 100),
        granted_by TEXT,
        PRIMARY KEY (user_id, role_id)
    )",
    "CREATE TABLE profiles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        bio TEXT
    )",
    "CREATE TABLE posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        position INTEGER NOT NULL
    )",
    "CREATE TABLE order_item (
        order_id INTEGER NOT NULL,
        product_id INTEGER NOT NULL,
        quantity INTEGER NOT NULL,
        PRIMARY KEY (order_id, product_id)
    )",
];

/// Install a fmt subscriber writing through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn register_entities() {
    registry::register(User::default);
    registry::register(Role::default);
    registry::register(Profile::default);
    registry::register(Post::default);
    registry::register(OrderItem::default);
}

/// A fresh in-memory database with the fixture schema and all fixture entities registered.
pub async fn setup() -> ConnectionRef {
    init_tracing();
    register_entities();

    let connection = SqliteBackend::connect("sqlite::memory:")
        .await
        .unwrap()
        .into_ref();

    for statement in SCHEMA {
        connection.execute(statement, &[]).await.unwrap();
    }

    connection
}

/// Wraps a connection and records the SQL of every statement passing through it.
pub struct CountingConnection {
    inner: ConnectionRef,
    statements: Arc<Mutex<Vec<String>>>,
}

impl CountingConnection {
    pub fn wrap(inner: ConnectionRef) -> (ConnectionRef, Arc<Mutex<Vec<String>>>) {
        let statements = Arc::default();
        let connection = Arc::new(Self {
            inner,
            statements: Arc::clone(&statements),
        });

        (connection, statements)
    }
}

#[async_trait]
impl Connection for CountingConnection {
    async fn execute(
        &self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<StatementResult, BackendError> {
        self.statements.lock().unwrap().push(sql.to_string());
        self.inner.execute(sql, parameters).await
    }

    async fn begin_transaction(&self) -> Result<Option<Box<dyn Transaction>>, BackendError> {
        self.inner.begin_transaction().await
    }
}
