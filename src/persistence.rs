use std::{any::type_name, marker::PhantomData};

use async_trait::async_trait;
use tracing::trace;

use crate::{
    connection::{ConnectionRef, resolve_connection},
    entity::{Entity, PrimaryKey, key_columns},
    error::{Error, Result},
    query::builder::QueryBuilder,
    registry,
    value::{Row, Value},
};

/// A query restricted to the row identified by `key`.
fn key_query<T: Entity>(connection: ConnectionRef, key: &PrimaryKey) -> Result<QueryBuilder<T>> {
    let pairs = key.pairs(type_name::<T>(), key_columns::<T>()?)?;

    Ok(pairs
        .into_iter()
        .fold(QueryBuilder::new(connection), |query, (column, value)| {
            query.filter_eq(&column, value)
        }))
}

/// Instance-level persistence, available on every [`Entity`].
///
/// Operations use the entity's attached connection, falling back to the process default.
#[async_trait]
pub trait Persist: Entity {
    /// Insert or update the entity.
    ///
    /// Returns `false` if nothing was written: an insert without any column to write, or an update
    /// that matched no row. Saving an unmodified persisted entity is a successful no-op.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] before any I/O if [`Entity::validate`] reports problems,
    /// [`Error::NoConnection`] if no connection is available, [`Error::Query`] if the statement
    /// fails.
    async fn save(&mut self) -> Result<bool>;

    /// Delete the entity's row. Returns `false` without I/O if the entity was never persisted or
    /// its key is unset.
    ///
    /// # Errors
    ///
    /// [`Error::NoConnection`] or [`Error::Query`].
    async fn delete(&mut self) -> Result<bool>;

    /// Reload the entity's attributes from its row. Returns `false` if the entity was never
    /// persisted or the row is gone.
    ///
    /// # Errors
    ///
    /// [`Error::NoConnection`] or [`Error::Query`].
    async fn refresh(&mut self) -> Result<bool>;
}

#[async_trait]
impl<T> Persist for T
where
    T: Entity,
{
    async fn save(&mut self) -> Result<bool> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        let keys = key_columns::<Self>()?;
        if self.exists() && !self.is_dirty() {
            return Ok(true);
        }

        let connection = resolve_connection(self.connection())?;

        if self.exists() {

            // Filter on the key as it was loaded, so that changing a key column updates the
            // right row.
            let mut query = QueryBuilder::<Self>::new(connection.clone());
            for key in keys {
                let value = self
                    .attributes()
                    .original(key)
                    .filter(|e| !e.is_null())
                    .cloned()
                    .ok_or_else(|| {
                        Error::State(format!(
                            "cannot update `{}` without a value for primary key column `{key}`",
                            type_name::<Self>()
                        ))
                    })?;
                query = query.filter_eq(key, value);
            }

            let affected = query.update(self.changes()).await?;
            if affected == 0 {
                return Ok(false);
            }
        } else {
            let values = self
                .attributes()
                .values()
                .iter()
                .filter(|(column, value)| !(keys.contains(&column.as_str()) && value.is_null()))
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect::<Row>();

            if values.is_empty() {
                return Ok(false);
            }

            let result = QueryBuilder::<Self>::new(connection.clone())
                .insert(values)
                .await?;

            if let ([key], Some(id)) = (keys, result.insert_id) {
                if self.get_attribute(key).is_none_or(Value::is_null) {
                    trace!(entity = type_name::<Self>(), %id, "writing back generated key");
                    self.set_attribute(*key, id);
                }
            }
        }

        self.mark_as_existing();
        if self.connection().is_none() {
            self.attach_connection(connection);
        }

        Ok(true)
    }

    async fn delete(&mut self) -> Result<bool> {
        if !self.exists() {
            return Ok(false);
        }
        let Some(key) = self.primary_key() else {
            return Ok(false);
        };

        let connection = resolve_connection(self.connection())?;
        let affected = key_query::<Self>(connection, &key)?.delete().await?;
        self.attributes_mut().set_exists(false);

        Ok(affected > 0)
    }

    async fn refresh(&mut self) -> Result<bool> {
        if !self.exists() {
            return Ok(false);
        }
        let Some(key) = self.primary_key() else {
            return Ok(false);
        };

        let connection = resolve_connection(self.connection())?;
        let Some(row) = key_query::<Self>(connection, &key)?.first_row().await? else {
            return Ok(false);
        };

        self.fill(row);
        self.mark_as_existing();

        Ok(true)
    }
}

/// A hand-written `WHERE` condition for the [`Finder`] helpers.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Filter {
    /// Match every row.
    #[default]
    All,
    /// `column = value`
    Eq(String, Value),
    /// A condition with its own `?` placeholders.
    Raw(String, Vec<Value>),
}

impl Filter {
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    #[must_use]
    pub fn raw<I, V>(sql: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Raw(sql.into(), parameters.into_iter().map(Into::into).collect())
    }

    fn apply<T: Entity>(self, query: QueryBuilder<T>) -> QueryBuilder<T> {
        match self {
            Self::All => query,
            Self::Eq(column, value) => query.filter_eq(&column, value),
            Self::Raw(sql, parameters) => query.filter_raw(sql, parameters),
        }
    }
}

/// Options of [`Finder::fetch_all`] and [`Finder::fetch_one`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub filter: Filter,
    /// Raw ordering clause, e.g. `name DESC`.
    pub order_by: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl FetchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn apply<T: Entity>(self, query: QueryBuilder<T>) -> QueryBuilder<T> {
        let mut query = self.filter.apply(query);

        if let Some(order_by) = self.order_by {
            query = query.order_by_raw(order_by);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }

        query
    }
}

/// Static-style finders and creators for `T`, bound to one connection. Obtain one through
/// [`Entity::using`] or [`Entity::finder`].
///
/// Every returned entity is built through the type registry and carries the finder's connection.
pub struct Finder<T>
where
    T: Entity,
{
    marker: PhantomData<T>,
    connection: ConnectionRef,
}

impl<T> Finder<T>
where
    T: Entity,
{
    pub(crate) const fn new(connection: ConnectionRef) -> Self {
        Self {
            marker: PhantomData,
            connection,
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    /// A query builder on `T`'s table.
    #[must_use]
    pub fn query(&self) -> QueryBuilder<T> {
        QueryBuilder::new(self.connection.clone())
    }

    /// # Errors
    ///
    /// [`Error::ModelNotRegistered`] or [`Error::Query`].
    pub async fn fetch_all(&self, options: FetchOptions) -> Result<Vec<T>> {
        options.apply(self.query()).get().await
    }

    /// # Errors
    ///
    /// [`Error::ModelNotRegistered`] or [`Error::Query`].
    pub async fn fetch_one(&self, options: FetchOptions) -> Result<Option<T>> {
        options.apply(self.query()).first().await
    }

    /// Look up one row by primary key. Composite keys take a [`PrimaryKey::Composite`].
    ///
    /// # Errors
    ///
    /// [`Error::Argument`] if the key's shape does not match `T`'s key columns, otherwise
    /// [`Error::ModelNotRegistered`] or [`Error::Query`].
    pub async fn find(&self, key: impl Into<PrimaryKey>) -> Result<Option<T>> {
        let key = key.into();
        key_query::<T>(self.connection.clone(), &key)?.first().await
    }

    /// All rows where `column = value`.
    ///
    /// # Errors
    ///
    /// [`Error::ModelNotRegistered`] or [`Error::Query`].
    pub async fn where_eq(&self, column: &str, value: impl Into<Value>) -> Result<Vec<T>> {
        let query = self.query().filter_eq(column, value);
        query.get().await
    }

    /// All rows matching a hand-written condition.
    ///
    /// # Errors
    ///
    /// [`Error::ModelNotRegistered`] or [`Error::Query`].
    pub async fn where_raw<I, V>(&self, sql: &str, parameters: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let query = self.query().filter_raw(sql, parameters);
        query.get().await
    }

    /// Create, fill and save a new entity.
    ///
    /// # Errors
    ///
    /// [`Error::ModelNotRegistered`], [`Error::Validation`] or [`Error::Query`].
    pub async fn create<I, K, V>(&self, attributes: I) -> Result<T>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut entity = registry::create::<T>()?;
        entity.attach_connection(self.connection.clone());
        entity.fill(attributes);
        entity.save().await?;

        Ok(entity)
    }

    /// # Errors
    ///
    /// [`Error::Query`].
    pub async fn count(&self, filter: Filter) -> Result<u64> {
        filter.apply(self.query()).count().await
    }

    /// # Errors
    ///
    /// [`Error::Query`].
    pub async fn any(&self, filter: Filter) -> Result<bool> {
        filter.apply(self.query()).exists().await
    }

    /// Delete all rows matching `filter`, returning the number of deleted rows.
    ///
    /// # Errors
    ///
    /// [`Error::Query`].
    pub async fn delete_where(&self, filter: Filter) -> Result<u64> {
        filter.apply(self.query()).delete().await
    }

    /// Update all rows matching `filter`, returning the number of updated rows.
    ///
    /// # Errors
    ///
    /// [`Error::Argument`] if `values` is empty, otherwise [`Error::Query`].
    pub async fn update_where<I, K, V>(&self, values: I, filter: Filter) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        filter.apply(self.query()).update(values).await
    }
}
