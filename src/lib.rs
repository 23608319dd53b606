//! An active-record style ORM core: entities backed by a dynamic attribute store with dirty
//! tracking, a fluent query builder, instance persistence and relationship resolvers, all running
//! through one pluggable [`Connection`](connection::Connection).

pub mod connection;
pub mod entity;
pub mod error;
pub mod persistence;
pub mod query;
pub mod registry;
pub mod value;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

/// Derive macro to implement [`Entity`](entity::Entity), together with identity based
/// `PartialEq`, `Eq` and `Hash`.
pub use tidal_orm_macros::Entity;

pub use sqlx;

/// Glob-import this to bring the traits and types most code needs into scope.
pub mod prelude {
    pub use crate::{
        connection::{Connection, ConnectionRef, StatementResult, Transaction},
        entity::{
            Entity, PrimaryKey,
            attributes::Attributes,
            relation::{BelongsTo, BelongsToMany, HasMany, HasOne},
        },
        error::{Error, Result},
        persistence::{FetchOptions, Filter, Finder, Persist},
        query::builder::QueryBuilder,
        value::{Row, Value},
    };

    pub use tidal_orm_macros::Entity;
}
