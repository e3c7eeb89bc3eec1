use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::engine::{EngineOptions, StorageEngine};
use super::register::{Register, RegisterUpdate};
use crate::shared::AppError;

/// In-memory storage engine for development and testing
///
/// Registers live in a map keyed by session id and are lost when the engine
/// is dropped. Every operation takes the map lock once, so
/// `compare_and_update` is atomic.
pub struct MemoryEngine {
    registers: Mutex<HashMap<String, Register>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Name the engine is registered under by `EngineRegistry::with_defaults`
    pub const NAME: &'static str = "Memory";

    /// Creates a new empty in-memory engine
    pub fn new() -> Self {
        Self {
            registers: Mutex::new(HashMap::new()),
        }
    }

    /// Engine constructor for the registry; options are ignored
    pub fn from_options(_options: &EngineOptions) -> Result<Self, AppError> {
        Ok(Self::new())
    }

    /// Creates an in-memory engine with pre-populated registers
    pub fn with_registers(registers: Vec<Register>) -> Self {
        let mut register_map = HashMap::new();
        for mut register in registers {
            let session_id = register
                .session_id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            register_map.insert(session_id, register);
        }

        Self {
            registers: Mutex::new(register_map),
        }
    }

    /// Returns the current number of stored registers
    pub fn register_count(&self) -> usize {
        self.registers.lock().len()
    }

    /// Checks if a register exists by ID (useful for debugging)
    pub fn has_register(&self, session_id: &str) -> bool {
        self.registers.lock().contains_key(session_id)
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    #[instrument(skip(self, register))]
    async fn create(&self, mut register: Register) -> Result<Register, AppError> {
        let session_id = register
            .session_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        debug!(
            session_id = %session_id,
            user_id = ?register.user_id,
            "Creating register in memory"
        );

        let mut registers = self.registers.lock();
        if registers.contains_key(&session_id) {
            warn!(session_id = %session_id, "Register already exists in memory");
            return Err(AppError::DatabaseError(
                "Register already exists".to_string(),
            ));
        }
        registers.insert(session_id.clone(), register.clone());

        debug!(session_id = %session_id, "Register created successfully in memory");
        Ok(register)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, session_id: &str) -> Result<Register, AppError> {
        debug!(session_id = %session_id, "Fetching register from memory");

        let registers = self.registers.lock();
        match registers.get(session_id) {
            Some(register) => {
                debug!(session_id = %session_id, "Register found in memory");
                Ok(register.clone())
            }
            None => {
                debug!(session_id = %session_id, "Register not found in memory");
                Err(AppError::NotFound(format!("Cannot find {session_id}")))
            }
        }
    }

    #[instrument(skip(self))]
    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Register>, AppError> {
        debug!(user_id = %user_id, "Listing registers for user in memory");

        let registers = self.registers.lock();
        let owned: Vec<Register> = registers
            .values()
            .filter(|register| register.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect();

        debug!(user_id = %user_id, count = owned.len(), "Registers listed in memory");
        Ok(owned)
    }

    #[instrument(skip(self, register, sets))]
    async fn update(
        &self,
        register: &Register,
        sets: &RegisterUpdate,
    ) -> Result<Register, AppError> {
        let Some(session_id) = register.session_id.as_deref() else {
            warn!("Update requested for a register without session id");
            return Err(AppError::NotFound("Register has no session id".to_string()));
        };
        debug!(session_id = %session_id, "Updating register in memory");

        let mut registers = self.registers.lock();
        let Some(stored) = registers.get_mut(session_id) else {
            warn!(session_id = %session_id, "Register not found for update in memory");
            return Err(AppError::NotFound(format!("Cannot find {session_id}")));
        };
        sets.apply(stored);

        debug!(session_id = %session_id, "Register updated successfully in memory");
        Ok(stored.clone())
    }

    #[instrument(skip(self, sets))]
    async fn compare_and_update(
        &self,
        session_id: &str,
        expected_refresh_at: Option<i64>,
        sets: &RegisterUpdate,
    ) -> Result<Option<Register>, AppError> {
        let mut registers = self.registers.lock();
        let Some(stored) = registers.get_mut(session_id) else {
            warn!(session_id = %session_id, "Register not found for conditional update in memory");
            return Err(AppError::NotFound(format!("Cannot find {session_id}")));
        };

        if stored.refresh_at != expected_refresh_at {
            debug!(
                session_id = %session_id,
                stored = ?stored.refresh_at,
                expected = ?expected_refresh_at,
                "Conditional update rejected in memory"
            );
            return Ok(None);
        }
        sets.apply(stored);

        debug!(session_id = %session_id, "Register conditionally updated in memory");
        Ok(Some(stored.clone()))
    }

    #[instrument(skip(self))]
    async fn delete_by_id(&self, session_id: &str) -> Result<bool, AppError> {
        debug!(session_id = %session_id, "Deleting register from memory");

        let removed = self.registers.lock().remove(session_id).is_some();
        if !removed {
            debug!(session_id = %session_id, "Register not found for deletion in memory");
        }
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn delete_by_user_id(&self, user_id: &str) -> Result<bool, AppError> {
        debug!(user_id = %user_id, "Deleting registers for user from memory");

        let mut registers = self.registers.lock();
        let initial_count = registers.len();
        registers.retain(|_, register| register.user_id.as_deref() != Some(user_id));

        debug!(
            user_id = %user_id,
            removed = initial_count - registers.len(),
            "Registers deleted for user from memory"
        );
        Ok(true)
    }

    #[instrument(skip(self, session_ids))]
    async fn delete_by_ids(&self, session_ids: &[String]) -> Result<bool, AppError> {
        debug!(count = session_ids.len(), "Deleting registers by id from memory");

        let mut registers = self.registers.lock();
        let mut all_deleted = true;
        for session_id in session_ids {
            all_deleted &= registers.remove(session_id).is_some();
        }
        Ok(all_deleted)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Test helper functions for creating test data
    mod helpers {
        use super::*;

        pub fn create_test_register(user_id: &str) -> Register {
            Register {
                user_id: Some(user_id.to_string()),
                scope: Some("read write".to_string()),
                refresh_at: Some(1_000),
                created_at: Some(1_000),
                ..Default::default()
            }
        }

        pub fn create_test_registers(user_id: &str, count: usize) -> Vec<Register> {
            (0..count).map(|_| create_test_register(user_id)).collect()
        }
    }

    use helpers::*;

    #[tokio::test]
    async fn test_create_assigns_session_id() {
        let engine = MemoryEngine::new();

        let stored = engine.create(create_test_register("me")).await.unwrap();
        let session_id = stored.session_id.clone().unwrap();
        assert!(!session_id.is_empty());

        let found = engine.find_by_id(&session_id).await.unwrap();
        assert_eq!(found, stored);
    }

    #[tokio::test]
    async fn test_create_keeps_supplied_session_id() {
        let engine = MemoryEngine::new();
        let mut register = create_test_register("me");
        register.session_id = Some("fixed-id".to_string());

        let stored = engine.create(register).await.unwrap();
        assert_eq!(stored.session_id.as_deref(), Some("fixed-id"));
        assert!(engine.has_register("fixed-id"));
    }

    #[tokio::test]
    async fn test_create_duplicate_register() {
        let engine = MemoryEngine::new();
        let mut register = create_test_register("me");
        register.session_id = Some("fixed-id".to_string());

        engine.create(register.clone()).await.unwrap();
        let result = engine.create(register).await;
        assert!(matches!(result, Err(AppError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_find_missing_register() {
        let engine = MemoryEngine::new();

        let result = engine.find_by_id("nonexistent-id").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_by_user_id_filters_owner() {
        let engine = MemoryEngine::with_registers(
            create_test_registers("alice", 3)
                .into_iter()
                .chain(create_test_registers("bob", 2))
                .collect(),
        );

        assert_eq!(engine.find_by_user_id("alice").await.unwrap().len(), 3);
        assert_eq!(engine.find_by_user_id("bob").await.unwrap().len(), 2);
        assert!(engine.find_by_user_id("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_returns_post_update_record() {
        let engine = MemoryEngine::new();
        let stored = engine.create(create_test_register("me")).await.unwrap();

        let updated = engine
            .update(&stored, &RegisterUpdate::new().with_refresh_at(2_000))
            .await
            .unwrap();
        assert_eq!(updated.refresh_at, Some(2_000));
        assert_eq!(updated.scope, stored.scope);
    }

    #[tokio::test]
    async fn test_update_missing_register() {
        let engine = MemoryEngine::new();
        let mut register = create_test_register("me");
        register.session_id = Some("ghost".to_string());

        let result = engine.update(&register, &RegisterUpdate::new()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_compare_and_update_rejects_stale_nonce() {
        let engine = MemoryEngine::new();
        let stored = engine.create(create_test_register("me")).await.unwrap();
        let session_id = stored.session_id.clone().unwrap();
        let sets = RegisterUpdate::new().with_refresh_at(2_000);

        let first = engine
            .compare_and_update(&session_id, Some(1_000), &sets)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = engine
            .compare_and_update(&session_id, Some(1_000), &sets)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let engine = MemoryEngine::new();
        let stored = engine.create(create_test_register("me")).await.unwrap();
        let session_id = stored.session_id.unwrap();

        assert!(engine.delete_by_id(&session_id).await.unwrap());
        assert!(!engine.delete_by_id(&session_id).await.unwrap());
        assert_eq!(engine.register_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_user_id_keeps_other_users() {
        let engine = MemoryEngine::with_registers(
            create_test_registers("alice", 2)
                .into_iter()
                .chain(create_test_registers("bob", 1))
                .collect(),
        );

        assert!(engine.delete_by_user_id("alice").await.unwrap());
        assert_eq!(engine.register_count(), 1);
        assert_eq!(engine.find_by_user_id("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_ids() {
        let engine = MemoryEngine::new();
        let first = engine.create(create_test_register("me")).await.unwrap();
        let second = engine.create(create_test_register("me")).await.unwrap();
        let ids = vec![first.session_id.unwrap(), second.session_id.unwrap()];

        assert!(engine.delete_by_ids(&ids).await.unwrap());
        assert!(!engine.delete_by_ids(&ids).await.unwrap());
    }
}
