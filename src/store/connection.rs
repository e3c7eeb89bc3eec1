use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::engine::{EngineOptions, StorageEngine};
use super::register::{Register, RegisterUpdate};
use super::registry::EngineRegistry;
use crate::shared::AppError;

/// Uniform facade over one instantiated storage engine
#[derive(Clone)]
pub struct ConnectionStore {
    engine: Arc<dyn StorageEngine>,
}

impl fmt::Debug for ConnectionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStore")
            .field("engine", &self.engine.name())
            .finish()
    }
}

impl ConnectionStore {
    /// Instantiates the engine registered under `engine_name`.
    ///
    /// Fails with `AppError::EngineNotFound` when the name is unknown.
    pub fn new(
        registry: &EngineRegistry,
        engine_name: &str,
        options: &EngineOptions,
    ) -> Result<Self, AppError> {
        let engine = registry.instantiate(engine_name, options)?;
        debug!(engine = %engine_name, "Connection store bound to engine");
        Ok(Self { engine })
    }

    /// Binds an already constructed engine
    pub fn from_engine(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    #[instrument(skip(self, register), fields(engine = self.engine.name()))]
    pub async fn create(&self, register: Register) -> Result<Register, AppError> {
        self.engine.create(register).await
    }

    #[instrument(skip(self), fields(engine = self.engine.name()))]
    pub async fn find_by_id(&self, session_id: &str) -> Result<Register, AppError> {
        self.engine.find_by_id(session_id).await
    }

    #[instrument(skip(self), fields(engine = self.engine.name()))]
    pub async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Register>, AppError> {
        self.engine.find_by_user_id(user_id).await
    }

    #[instrument(skip(self, register, sets), fields(engine = self.engine.name()))]
    pub async fn update(
        &self,
        register: &Register,
        sets: &RegisterUpdate,
    ) -> Result<Register, AppError> {
        self.engine.update(register, sets).await
    }

    #[instrument(skip(self, sets), fields(engine = self.engine.name()))]
    pub async fn compare_and_update(
        &self,
        session_id: &str,
        expected_refresh_at: Option<i64>,
        sets: &RegisterUpdate,
    ) -> Result<Option<Register>, AppError> {
        self.engine
            .compare_and_update(session_id, expected_refresh_at, sets)
            .await
    }

    #[instrument(skip(self), fields(engine = self.engine.name()))]
    pub async fn delete_by_id(&self, session_id: &str) -> Result<bool, AppError> {
        self.engine.delete_by_id(session_id).await
    }

    #[instrument(skip(self), fields(engine = self.engine.name()))]
    pub async fn delete_by_user_id(&self, user_id: &str) -> Result<bool, AppError> {
        self.engine.delete_by_user_id(user_id).await
    }

    #[instrument(skip(self, session_ids), fields(engine = self.engine.name()))]
    pub async fn delete_by_ids(&self, session_ids: &[String]) -> Result<bool, AppError> {
        self.engine.delete_by_ids(session_ids).await
    }
}
