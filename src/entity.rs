pub mod attributes;
pub mod relation;

use std::{
    any::{TypeId, type_name},
    hash::{Hash, Hasher},
};

use attributes::Attributes;
use convert_case::{Case, Casing};

use crate::{
    connection::{ConnectionRef, resolve_connection},
    error::{Error, Result},
    persistence::Finder,
    query::builder::QueryBuilder,
    registry,
    value::{FromValue, Row, Value},
};

/// The primary key of an entity: a single value for single-column keys, or the ordered
/// column/value pairs of a composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    Scalar(Value),
    Composite(Vec<(String, Value)>),
}

impl PrimaryKey {
    /// Build a composite key from column/value pairs.
    pub fn composite<I, K, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Composite(
            parts
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Match this key against the key columns of an entity, returning one `(column, value)` pair
    /// per key column, in key column order.
    ///
    /// # Errors
    ///
    /// [`Error::Argument`] if the key's shape does not fit `columns`, and
    /// [`Error::EmptyPrimaryKey`] if there are no key columns at all.
    pub fn pairs(&self, entity: &'static str, columns: &[&str]) -> Result<Vec<(String, Value)>> {
        match (self, columns) {
            (_, []) => Err(Error::EmptyPrimaryKey(entity)),
            (Self::Scalar(value), [column]) => Ok(vec![((*column).to_string(), value.clone())]),
            (Self::Scalar(_), _) => Err(Error::Argument(format!(
                "`{entity}` has a composite primary key ({}), a single value cannot identify a row",
                columns.join(", ")
            ))),
            (Self::Composite(parts), columns) => {
                if parts.len() != columns.len() {
                    return Err(Error::Argument(format!(
                        "expected {} primary key parts for `{entity}`, got {}",
                        columns.len(),
                        parts.len()
                    )));
                }

                columns
                    .iter()
                    .map(|column| {
                        parts
                            .iter()
                            .find(|(name, _)| name == column)
                            .map(|(name, value)| (name.clone(), value.clone()))
                            .ok_or_else(|| {
                                Error::Argument(format!(
                                    "missing primary key part `{column}` for `{entity}`"
                                ))
                            })
                    })
                    .collect()
            }
        }
    }
}

impl<T> From<T> for PrimaryKey
where
    T: Into<Value>,
{
    fn from(value: T) -> Self {
        Self::Scalar(value.into())
    }
}

/// The snake_case form of a type's name, without module path or generics.
#[must_use]
pub fn default_table_name<T: ?Sized>() -> String {
    let full = type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    let name = without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics);

    name.to_case(Case::Snake)
}

/// A row of a database table, represented as an attribute store plus primary key metadata.
///
/// Implement this with `#[derive(Entity)]`, or by hand by providing the table name, primary key
/// columns and access to the [`Attributes`] store.
pub trait Entity: Sized + Send + Sync + 'static {
    /// The name of this entity's table in the database. Defaults to the snake_case type name.
    fn table_name() -> String {
        default_table_name::<Self>()
    }

    /// Ordered primary key columns.
    fn primary_keys() -> &'static [&'static str] {
        &["id"]
    }

    fn attributes(&self) -> &Attributes;

    fn attributes_mut(&mut self) -> &mut Attributes;

    /// Validation hook run before every save. A non-empty result aborts the save.
    fn validate(&self) -> Vec<String> {
        vec![]
    }

    fn get_attribute(&self, name: &str) -> Option<&Value> {
        self.attributes().get(name)
    }

    fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes_mut().set(name, value);
    }

    /// Read an attribute as `V`, converting loosely typed values where possible.
    fn get<V: FromValue>(&self, name: &str) -> Option<V> {
        self.get_attribute(name).and_then(V::from_value)
    }

    fn fill<I, K, V>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.attributes_mut().fill(attributes);
    }

    fn changes(&self) -> Row {
        self.attributes().changes()
    }

    fn is_dirty(&self) -> bool {
        self.attributes().is_dirty()
    }

    fn reset(&mut self) {
        self.attributes_mut().reset();
    }

    fn exists(&self) -> bool {
        self.attributes().exists()
    }

    fn mark_as_existing(&mut self) {
        self.attributes_mut().mark_as_existing();
    }

    /// The entity's primary key, or `None` if any key column is unset or null.
    fn primary_key(&self) -> Option<PrimaryKey> {
        let key_value = |column: &str| {
            self.get_attribute(column)
                .filter(|e| !e.is_null())
                .cloned()
        };

        match Self::primary_keys() {
            [] => None,
            [column] => key_value(column).map(PrimaryKey::Scalar),
            columns => columns
                .iter()
                .map(|column| key_value(column).map(|value| ((*column).to_string(), value)))
                .collect::<Option<Vec<_>>>()
                .map(PrimaryKey::Composite),
        }
    }

    /// All current attributes as a JSON object, explicit nulls included.
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.attributes()
                .values()
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// Duplicate this entity through the type registry, then apply `overrides` to the duplicate.
    /// The duplicate keeps the source's snapshots, `exists` flag and connection.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] if `Self` was never registered.
    fn copy_with<I, K, V>(&self, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let registry = registry::global();

        if !registry.is_registered::<Self>() {
            return Err(Error::Unsupported(format!(
                "copying `{}` requires the type to be registered",
                type_name::<Self>()
            )));
        }

        let mut copy = registry.create::<Self>()?;
        *copy.attributes_mut() = self.attributes().clone();
        copy.fill(overrides);

        Ok(copy)
    }

    fn connection(&self) -> Option<&ConnectionRef> {
        self.attributes().connection()
    }

    fn attach_connection(&mut self, connection: ConnectionRef) {
        self.attributes_mut().attach_connection(connection);
    }

    /// Static-style finders running on `connection`.
    fn using(connection: &ConnectionRef) -> Finder<Self> {
        Finder::new(connection.clone())
    }

    /// Static-style finders running on the process default connection.
    ///
    /// # Errors
    ///
    /// [`Error::NoConnection`] if no default connection is installed.
    fn finder() -> Result<Finder<Self>> {
        Ok(Finder::new(resolve_connection(None)?))
    }

    /// A query builder for this entity's table.
    fn query_on(connection: &ConnectionRef) -> QueryBuilder<Self> {
        QueryBuilder::new(connection.clone())
    }
}

/// The primary key columns of `T`.
///
/// # Errors
///
/// [`Error::EmptyPrimaryKey`] if `T` declares none.
pub fn key_columns<T: Entity>() -> Result<&'static [&'static str]> {
    match T::primary_keys() {
        [] => Err(Error::EmptyPrimaryKey(type_name::<T>())),
        columns => Ok(columns),
    }
}

/// Entity equality: same runtime type and the same fully populated primary key. Entities without a
/// complete key are only equal to themselves.
pub fn same_identity<A: Entity, B: Entity>(a: &A, b: &B) -> bool {
    if TypeId::of::<A>() == TypeId::of::<B>() {
        if let (Some(left), Some(right)) = (a.primary_key(), b.primary_key()) {
            return left == right;
        }
    }

    std::ptr::addr_eq(a, b)
}

/// Hash consistent with [`same_identity`].
pub fn hash_identity<E: Entity, H: Hasher>(entity: &E, state: &mut H) {
    TypeId::of::<E>().hash(state);

    match entity.primary_key() {
        Some(key) => key.hash(state),
        None => std::ptr::from_ref(entity).addr().hash(state),
    }
}
