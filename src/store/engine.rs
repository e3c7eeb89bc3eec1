use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::register::{Register, RegisterUpdate};
use crate::shared::AppError;

/// Settings handed to an engine constructor (connection URL, table name...)
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    settings: Map<String, Value>,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    /// Like `get_str` but fails with `InvalidConfig` when the key is missing
    pub fn require_str(&self, key: &str) -> Result<&str, AppError> {
        self.get_str(key)
            .ok_or_else(|| AppError::InvalidConfig(format!("engine option `{key}` is required")))
    }
}

/// Persistence backend contract for session registers.
///
/// Implementations own the consistency of concurrent writes to the same
/// session id. The orchestrator only relies on `compare_and_update` being
/// atomic for refresh-token rotation.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Stores a new register, assigning a session id when the caller did not
    async fn create(&self, register: Register) -> Result<Register, AppError>;

    /// Fails with `AppError::NotFound` when absent
    async fn find_by_id(&self, session_id: &str) -> Result<Register, AppError>;

    /// Empty when the user owns no sessions
    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Register>, AppError>;

    /// Applies `sets` over the stored register and returns the post-update record
    async fn update(&self, register: &Register, sets: &RegisterUpdate)
        -> Result<Register, AppError>;

    /// Returns whether a register was removed
    async fn delete_by_id(&self, session_id: &str) -> Result<bool, AppError>;

    /// Returns whether every register owned by the user was removed
    async fn delete_by_user_id(&self, user_id: &str) -> Result<bool, AppError>;

    /// Applies `sets` only if the stored `refresh_at` equals `expected_refresh_at`.
    ///
    /// Returns `Ok(None)` when the precondition does not hold. This default is
    /// a plain read followed by a write and is NOT atomic; engines that can
    /// express a conditional write should override it.
    async fn compare_and_update(
        &self,
        session_id: &str,
        expected_refresh_at: Option<i64>,
        sets: &RegisterUpdate,
    ) -> Result<Option<Register>, AppError> {
        let current = self.find_by_id(session_id).await?;
        if current.refresh_at != expected_refresh_at {
            debug!(session_id = %session_id, "Conditional update precondition failed");
            return Ok(None);
        }
        self.update(&current, sets).await.map(Some)
    }

    /// Deletes many registers; true only if every delete succeeded.
    ///
    /// Requests are issued concurrently with no ordering and no rollback.
    async fn delete_by_ids(&self, session_ids: &[String]) -> Result<bool, AppError> {
        let results = futures::future::join_all(
            session_ids
                .iter()
                .map(|session_id| self.delete_by_id(session_id)),
        )
        .await;

        let mut all_deleted = true;
        for result in results {
            all_deleted &= result?;
        }
        Ok(all_deleted)
    }

    /// Human-readable engine name (for logging/debugging)
    fn name(&self) -> &'static str;
}
