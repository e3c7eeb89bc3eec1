use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::connection::ConnectionStore;
use super::engine::{EngineOptions, StorageEngine};
use super::memory::MemoryEngine;
use crate::shared::AppError;

/// Builds an engine instance from its options
pub type EngineConstructor =
    Arc<dyn Fn(&EngineOptions) -> Result<Arc<dyn StorageEngine>, AppError> + Send + Sync>;

/// Name → constructor table for storage engines.
///
/// Entries are write-once: registering a name that is already taken fails
/// with `AppError::EngineAlreadyRegistered` and keeps the first constructor.
/// The registry is an ordinary value handed to whoever needs it, so separate
/// instances never see each other's engines.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: Arc<RwLock<HashMap<String, EngineConstructor>>>,
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.names())
            .finish()
    }
}

impl EngineRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the engines bundled in this crate
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.install_defaults();
        registry
    }

    fn install_defaults(&self) {
        let mut engines = self.engines.write();
        engines.insert(
            MemoryEngine::NAME.to_string(),
            Arc::new(
                |options: &EngineOptions| -> Result<Arc<dyn StorageEngine>, AppError> {
                    Ok(Arc::new(MemoryEngine::from_options(options)?) as Arc<dyn StorageEngine>)
                },
            ),
        );
        #[cfg(feature = "postgres")]
        engines.insert(
            super::postgres::PostgresEngine::NAME.to_string(),
            Arc::new(
                |options: &EngineOptions| -> Result<Arc<dyn StorageEngine>, AppError> {
                    let engine = super::postgres::PostgresEngine::from_options(options)?;
                    Ok(Arc::new(engine) as Arc<dyn StorageEngine>)
                },
            ),
        );
    }

    /// Registers a type-erased constructor under `name`
    pub fn register(
        &self,
        name: impl Into<String>,
        constructor: EngineConstructor,
    ) -> Result<(), AppError> {
        let name = name.into();
        let mut engines = self.engines.write();
        if engines.contains_key(&name) {
            warn!(engine = %name, "Rejected duplicate engine registration");
            return Err(AppError::EngineAlreadyRegistered(name));
        }

        info!(engine = %name, "Registering storage engine");
        engines.insert(name, constructor);
        Ok(())
    }

    /// Registers a constructor returning a concrete engine type
    pub fn register_engine<E, F>(
        &self,
        name: impl Into<String>,
        constructor: F,
    ) -> Result<(), AppError>
    where
        E: StorageEngine + 'static,
        F: Fn(&EngineOptions) -> Result<E, AppError> + Send + Sync + 'static,
    {
        self.register(
            name,
            Arc::new(
                move |options: &EngineOptions| -> Result<Arc<dyn StorageEngine>, AppError> {
                    Ok(Arc::new(constructor(options)?) as Arc<dyn StorageEngine>)
                },
            ),
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engines.read().contains_key(name)
    }

    /// Registered engine names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiates the engine registered under `name`
    pub fn instantiate(
        &self,
        name: &str,
        options: &EngineOptions,
    ) -> Result<Arc<dyn StorageEngine>, AppError> {
        let constructor = self.engines.read().get(name).cloned();
        match constructor {
            Some(constructor) => {
                debug!(engine = %name, "Instantiating storage engine");
                constructor(options)
            }
            None => {
                warn!(engine = %name, "Storage engine not registered");
                Err(AppError::EngineNotFound(format!(
                    "Your engine \"{name}\" was not found"
                )))
            }
        }
    }

    /// Instantiates the named engine and binds it to a connection store
    pub fn connect(
        &self,
        name: &str,
        options: &EngineOptions,
    ) -> Result<ConnectionStore, AppError> {
        ConnectionStore::new(self, name, options)
    }
}
