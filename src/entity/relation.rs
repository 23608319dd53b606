//! Relationship resolvers. Each resolver is a small description of how two tables are linked and
//! loads the related side on demand, through the owner's connection.
//!
//! ```ignore
//! let role = BelongsTo::<Role>::new("role_id").resolve(&user).await?;
//! let posts = HasMany::<Post>::new("user_id").order_by("created_at DESC").resolve(&user).await?;
//! ```

use std::{any::type_name, marker::PhantomData};

use itertools::Itertools;
use tracing::debug;

use crate::{
    connection::{resolve_connection, run_in, transaction},
    entity::Entity,
    error::{Error, Result},
    query::builder::QueryBuilder,
    value::{Row, Value},
};

/// The non-null value of `column` on `entity`.
fn key_value<E: Entity>(entity: &E, column: &str) -> Option<Value> {
    entity
        .get_attribute(column)
        .filter(|e| !e.is_null())
        .cloned()
}

/// Like [`key_value`], for operations that cannot proceed without the key.
fn required_key<E: Entity>(entity: &E, column: &str) -> Result<Value> {
    key_value(entity, column).ok_or_else(|| {
        Error::State(format!(
            "`{}` has no value for key column `{column}`",
            type_name::<E>()
        ))
    })
}

fn first_key_column<R: Entity>() -> String {
    R::primary_keys().first().copied().unwrap_or("id").to_string()
}

/// The owner holds a reference to the related entity: `related.foreign_key = owner.local_key`.
pub struct BelongsTo<R>
where
    R: Entity,
{
    marker: PhantomData<R>,
    local_key: String,
    foreign_key: String,
}

impl<R> BelongsTo<R>
where
    R: Entity,
{
    /// `local_key` is the owner's column referencing `R`. The referenced column defaults to `R`'s
    /// first primary key column.
    #[must_use]
    pub fn new(local_key: impl Into<String>) -> Self {
        Self {
            marker: PhantomData,
            local_key: local_key.into(),
            foreign_key: first_key_column::<R>(),
        }
    }

    #[must_use]
    pub fn foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = foreign_key.into();
        self
    }

    /// Load the related entity. Returns `None` without querying if the owner's key is unset.
    ///
    /// # Errors
    ///
    /// [`Error::NoConnection`], [`Error::ModelNotRegistered`] or [`Error::Query`].
    pub async fn resolve<O: Entity>(&self, owner: &O) -> Result<Option<R>> {
        let Some(value) = key_value(owner, &self.local_key) else {
            return Ok(None);
        };

        let connection = resolve_connection(owner.connection())?;
        QueryBuilder::<R>::new(connection)
            .filter_eq(&self.foreign_key, value)
            .first()
            .await
    }
}

/// The related entity references the owner, at most once.
pub struct HasOne<R>
where
    R: Entity,
{
    marker: PhantomData<R>,
    foreign_key: String,
    local_key: String,
}

impl<R> HasOne<R>
where
    R: Entity,
{
    /// `foreign_key` is `R`'s column referencing the owner's `id`.
    #[must_use]
    pub fn new(foreign_key: impl Into<String>) -> Self {
        Self {
            marker: PhantomData,
            foreign_key: foreign_key.into(),
            local_key: "id".to_string(),
        }
    }

    #[must_use]
    pub fn local_key(mut self, local_key: impl Into<String>) -> Self {
        self.local_key = local_key.into();
        self
    }

    /// # Errors
    ///
    /// [`Error::NoConnection`], [`Error::ModelNotRegistered`] or [`Error::Query`].
    pub async fn resolve<O: Entity>(&self, owner: &O) -> Result<Option<R>> {
        let Some(value) = key_value(owner, &self.local_key) else {
            return Ok(None);
        };

        let connection = resolve_connection(owner.connection())?;
        QueryBuilder::<R>::new(connection)
            .filter_eq(&self.foreign_key, value)
            .first()
            .await
    }
}

/// Any number of related entities reference the owner.
pub struct HasMany<R>
where
    R: Entity,
{
    marker: PhantomData<R>,
    foreign_key: String,
    local_key: String,
    order_by: Option<String>,
}

impl<R> HasMany<R>
where
    R: Entity,
{
    #[must_use]
    pub fn new(foreign_key: impl Into<String>) -> Self {
        Self {
            marker: PhantomData,
            foreign_key: foreign_key.into(),
            local_key: "id".to_string(),
            order_by: None,
        }
    }

    #[must_use]
    pub fn local_key(mut self, local_key: impl Into<String>) -> Self {
        self.local_key = local_key.into();
        self
    }

    /// Raw ordering clause for the result, e.g. `created_at DESC`.
    #[must_use]
    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    /// # Errors
    ///
    /// [`Error::NoConnection`], [`Error::ModelNotRegistered`] or [`Error::Query`].
    pub async fn resolve<O: Entity>(&self, owner: &O) -> Result<Vec<R>> {
        let Some(value) = key_value(owner, &self.local_key) else {
            return Ok(vec![]);
        };

        let connection = resolve_connection(owner.connection())?;
        let mut query = QueryBuilder::<R>::new(connection).filter_eq(&self.foreign_key, value);
        if let Some(order_by) = &self.order_by {
            query = query.order_by_raw(order_by.clone());
        }

        query.get().await
    }
}

/// Owner and related entities are linked through rows of a pivot table.
pub struct BelongsToMany<R>
where
    R: Entity,
{
    marker: PhantomData<R>,
    pivot: String,
    foreign_pivot_key: String,
    related_pivot_key: String,
    local_key: String,
    related_key: String,
    order_by: Option<String>,
}

impl<R> BelongsToMany<R>
where
    R: Entity,
{
    /// `foreign_pivot_key` is the pivot column referencing the owner, `related_pivot_key` the one
    /// referencing `R`.
    #[must_use]
    pub fn new(
        pivot: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        Self {
            marker: PhantomData,
            pivot: pivot.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
            local_key: "id".to_string(),
            related_key: first_key_column::<R>(),
            order_by: None,
        }
    }

    #[must_use]
    pub fn local_key(mut self, local_key: impl Into<String>) -> Self {
        self.local_key = local_key.into();
        self
    }

    #[must_use]
    pub fn related_key(mut self, related_key: impl Into<String>) -> Self {
        self.related_key = related_key.into();
        self
    }

    #[must_use]
    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    fn pivot_row(&self, owner_key: Value, related_key: Value) -> Row {
        Row::from([
            (self.foreign_pivot_key.clone(), owner_key),
            (self.related_pivot_key.clone(), related_key),
        ])
    }

    /// Load all related entities.
    ///
    /// # Errors
    ///
    /// [`Error::NoConnection`], [`Error::ModelNotRegistered`] or [`Error::Query`].
    pub async fn resolve<O: Entity>(&self, owner: &O) -> Result<Vec<R>> {
        let Some(value) = key_value(owner, &self.local_key) else {
            return Ok(vec![]);
        };

        let connection = resolve_connection(owner.connection())?;
        let table = R::table_name();

        let mut query = QueryBuilder::<R>::new(connection)
            .select([format!("{table}.*")])
            .join(
                &self.pivot,
                &format!("{table}.{}", self.related_key),
                "=",
                &format!("{}.{}", self.pivot, self.related_pivot_key),
            )
            .filter_eq(&format!("{}.{}", self.pivot, self.foreign_pivot_key), value);
        if let Some(order_by) = &self.order_by {
            query = query.order_by_raw(order_by.clone());
        }

        query.get().await
    }

    /// Link `related` to `owner`, inserting one pivot row. `pivot_data` holds extra pivot columns.
    ///
    /// # Errors
    ///
    /// [`Error::State`] if either side's key is unset, otherwise [`Error::NoConnection`] or
    /// [`Error::Query`].
    pub async fn attach<O, I, K, V>(&self, owner: &O, related: &R, pivot_data: I) -> Result<()>
    where
        O: Entity,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let owner_key = required_key(owner, &self.local_key)?;
        let related_key = required_key(related, &self.related_key)?;
        let connection = resolve_connection(owner.connection())?;

        let mut row = pivot_data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<Row>();
        row.extend(self.pivot_row(owner_key, related_key));

        QueryBuilder::<R>::new(connection)
            .table(&self.pivot)
            .insert(row)
            .await?;

        Ok(())
    }

    /// Unlink `related` from `owner`, returning the number of deleted pivot rows.
    ///
    /// # Errors
    ///
    /// [`Error::State`] if either side's key is unset, otherwise [`Error::NoConnection`] or
    /// [`Error::Query`].
    pub async fn detach<O: Entity>(&self, owner: &O, related: &R) -> Result<u64> {
        let owner_key = required_key(owner, &self.local_key)?;
        let related_key = required_key(related, &self.related_key)?;
        let connection = resolve_connection(owner.connection())?;

        QueryBuilder::<R>::new(connection)
            .table(&self.pivot)
            .filter_eq(&self.foreign_pivot_key, owner_key)
            .filter_eq(&self.related_pivot_key, related_key)
            .delete()
            .await
    }

    /// Replace the owner's links with exactly `related`, in one transaction. Entities without a
    /// key are skipped and duplicates are linked once. Nothing changes if any statement fails.
    ///
    /// # Errors
    ///
    /// [`Error::State`] if the owner's key is unset, [`Error::TransactionsUnsupported`] if the
    /// connection cannot open a transaction, otherwise [`Error::Query`] or
    /// [`Error::Transaction`].
    pub async fn sync<O: Entity>(&self, owner: &O, related: &[R]) -> Result<()> {
        let owner_key = required_key(owner, &self.local_key)?;
        let connection = resolve_connection(owner.connection())?;

        let pivot = QueryBuilder::<R>::new(connection.clone()).table(&self.pivot);

        let mut statements = vec![
            QueryBuilder::<R>::new(connection.clone())
                .table(&self.pivot)
                .filter_eq(&self.foreign_pivot_key, owner_key.clone())
                .delete_statement()?,
        ];
        statements.extend(
            related
                .iter()
                .filter_map(|e| key_value(e, &self.related_key))
                .unique()
                .map(|e| pivot.insert_statement(&self.pivot_row(owner_key.clone(), e))),
        );

        debug!(
            pivot = %self.pivot,
            links = statements.len() - 1,
            "syncing pivot rows"
        );

        transaction(connection.as_ref(), move |tx| {
            Box::pin(async move {
                for statement in &statements {
                    run_in(&mut *tx, statement).await?;
                }
                Ok(())
            })
        })
        .await
    }
}
