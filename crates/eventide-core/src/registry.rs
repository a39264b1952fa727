//! Explicit registry of aggregate constructors, keyed by aggregate type name.
//!
//! The host application registers every aggregate type it stores at
//! startup and hands the registry to the aggregate store.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;

type Factory = Arc<dyn Fn(Uuid) -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// Maps aggregate type names to constructors of empty instances.
#[derive(Clone, Default)]
pub struct AggregateRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl AggregateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor for `A`, replacing any previous one.
    pub fn register<A, F>(&mut self, factory: F) -> &mut Self
    where
        A: AggregateRoot,
        F: Fn(Uuid) -> A + Send + Sync + 'static,
    {
        self.factories.insert(
            A::AGGREGATE_TYPE,
            Arc::new(move |id| Box::new(factory(id)) as Box<dyn Any + Send + Sync>),
        );
        self
    }

    /// Builder-style [`AggregateRegistry::register`].
    #[must_use]
    pub fn with<A, F>(mut self, factory: F) -> Self
    where
        A: AggregateRoot,
        F: Fn(Uuid) -> A + Send + Sync + 'static,
    {
        self.register::<A, F>(factory);
        self
    }

    /// Returns `true` if a constructor is registered under `aggregate_type`.
    #[must_use]
    pub fn is_registered(&self, aggregate_type: &str) -> bool {
        self.factories.contains_key(aggregate_type)
    }

    /// Constructs an empty `A` with the given id.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnregisteredAggregate` if `A` was never
    /// registered, or `DomainError::Infrastructure` if the registered
    /// constructor produced a different type under the same name.
    pub fn create<A: AggregateRoot>(&self, id: Uuid) -> Result<A, DomainError> {
        let factory = self
            .factories
            .get(A::AGGREGATE_TYPE)
            .ok_or_else(|| DomainError::UnregisteredAggregate(A::AGGREGATE_TYPE.to_owned()))?;
        factory(id).downcast::<A>().map(|aggregate| *aggregate).map_err(|_| {
            DomainError::Infrastructure(format!(
                "factory registered for {} builds a different type",
                A::AGGREGATE_TYPE
            ))
        })
    }
}

impl fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.factories.keys().collect();
        types.sort();
        f.debug_struct("AggregateRegistry")
            .field("types", &types)
            .finish()
    }
}
