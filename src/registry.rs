//! Runtime table mapping entity types to factories, so generic code (finders, relationship
//! resolvers, [`Entity::copy_with`]) can manufacture instances of a type it only knows through a
//! type parameter.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

use tracing::debug;

use crate::{
    entity::Entity,
    error::{Error, Result},
    value::{Row, Value},
};

type Factory = Arc<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;

struct RegistryEntry {
    name: &'static str,
    factory: Factory,
}

#[derive(Default)]
pub struct TypeRegistry {
    entries: RwLock<HashMap<TypeId, RegistryEntry>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` as the way to create blank instances of `T`. Registering a type again
    /// replaces its factory.
    pub fn register<T, F>(&self, factory: F)
    where
        T: Entity,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let name = type_name::<T>();
        debug!(entity = name, "registering entity factory");

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                TypeId::of::<T>(),
                RegistryEntry {
                    name,
                    factory: Arc::new(move || -> Box<dyn Any + Send + Sync> {
                        Box::new(factory())
                    }),
                },
            );
    }

    #[must_use]
    pub fn is_registered<T: Entity>(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<T>())
    }

    /// Names of all registered types.
    #[must_use]
    pub fn registered_names(&self) -> Vec<&'static str> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.name)
            .collect()
    }

    /// Create a blank instance of `T`.
    ///
    /// # Errors
    ///
    /// [`Error::ModelNotRegistered`] if no factory was registered for `T`.
    pub fn create<T: Entity>(&self) -> Result<T> {
        // The factory runs outside the lock, it may well use the registry itself.
        let factory = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .map(|e| e.factory.clone())
            .ok_or(Error::ModelNotRegistered(type_name::<T>()))?;

        factory()
            .downcast::<T>()
            .map(|e| *e)
            .map_err(|_| Error::ModelNotRegistered(type_name::<T>()))
    }

    /// Create an instance of `T` holding `row`. The instance counts as persisted only if every
    /// primary key column is present and non-null in `row`.
    ///
    /// # Errors
    ///
    /// [`Error::ModelNotRegistered`] if no factory was registered for `T`.
    pub fn from_row<T: Entity>(&self, row: Row) -> Result<T> {
        let mut entity = self.create::<T>()?;
        entity.fill(row);

        if entity.primary_key().is_some() {
            entity.mark_as_existing();
        }

        Ok(entity)
    }

    /// # Errors
    ///
    /// See [`from_row`](Self::from_row).
    pub fn from_rows<T: Entity>(&self, rows: impl IntoIterator<Item = Row>) -> Result<Vec<T>> {
        rows.into_iter().map(|e| self.from_row(e)).collect()
    }

    /// [`from_row`](Self::from_row) for a JSON object.
    ///
    /// # Errors
    ///
    /// [`Error::Argument`] if `json` is not an object, otherwise see [`from_row`](Self::from_row).
    pub fn from_json<T: Entity>(&self, json: &serde_json::Value) -> Result<T> {
        let serde_json::Value::Object(object) = json else {
            return Err(Error::Argument(format!(
                "cannot build `{}` from non-object JSON",
                type_name::<T>()
            )));
        };

        self.from_row(
            object
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
        )
    }

    /// [`from_json`](Self::from_json) for every object of a JSON array.
    ///
    /// # Errors
    ///
    /// [`Error::Argument`] if `json` is not an array of objects.
    pub fn from_json_list<T: Entity>(&self, json: &serde_json::Value) -> Result<Vec<T>> {
        let serde_json::Value::Array(items) = json else {
            return Err(Error::Argument(format!(
                "cannot build a list of `{}` from non-array JSON",
                type_name::<T>()
            )));
        };

        items.iter().map(|e| self.from_json(e)).collect()
    }
}

static GLOBAL: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::new);

/// The process-wide registry. Register every entity type before using it concurrently.
#[must_use]
pub fn global() -> &'static TypeRegistry {
    &GLOBAL
}

/// Register `factory` with the [global] registry.
pub fn register<T, F>(factory: F)
where
    T: Entity,
    F: Fn() -> T + Send + Sync + 'static,
{
    global().register(factory);
}

#[must_use]
pub fn is_registered<T: Entity>() -> bool {
    global().is_registered::<T>()
}

/// # Errors
///
/// See [`TypeRegistry::create`].
pub fn create<T: Entity>() -> Result<T> {
    global().create()
}

/// # Errors
///
/// See [`TypeRegistry::from_row`].
pub fn from_row<T: Entity>(row: Row) -> Result<T> {
    global().from_row(row)
}

/// # Errors
///
/// See [`TypeRegistry::from_json`].
pub fn from_json<T: Entity>(json: &serde_json::Value) -> Result<T> {
    global().from_json(json)
}

/// # Errors
///
/// See [`TypeRegistry::from_json_list`].
pub fn from_json_list<T: Entity>(json: &serde_json::Value) -> Result<Vec<T>> {
    global().from_json_list(json)
}
