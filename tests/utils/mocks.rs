use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use rauth::{
    AppError, EventError, MemoryEngine, Register, RegisterUpdate, SessionEvent,
    SessionEventListener, StorageEngine,
};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Listener that records every event it is handed
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(SessionEvent::event_type).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl SessionEventListener for RecordingListener {
    fn handle(&self, event: &SessionEvent) -> Result<(), EventError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "RecordingListener"
    }
}

/// Listener that always fails
pub struct FailingListener;

impl SessionEventListener for FailingListener {
    fn handle(&self, _event: &SessionEvent) -> Result<(), EventError> {
        Err(EventError::failed("listener always fails"))
    }

    fn name(&self) -> &str {
        "FailingListener"
    }
}

/// Engine that counts calls and keeps registers in a `MemoryEngine`.
///
/// Only the required methods are implemented, so `compare_and_update` and
/// `delete_by_ids` run the contract's default implementations.
#[derive(Clone, Default)]
pub struct CountingEngine {
    inner: Arc<MemoryEngine>,
    calls: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl CountingEngine {
    pub const NAME: &'static str = "Counting";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    pub fn register_count(&self) -> usize {
        self.inner.register_count()
    }

    fn record(&self, operation: &'static str) {
        *self.calls.lock().entry(operation).or_insert(0) += 1;
    }
}

#[async_trait]
impl StorageEngine for CountingEngine {
    async fn create(&self, register: Register) -> Result<Register, AppError> {
        self.record("create");
        self.inner.create(register).await
    }

    async fn find_by_id(&self, session_id: &str) -> Result<Register, AppError> {
        self.record("find_by_id");
        self.inner.find_by_id(session_id).await
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Register>, AppError> {
        self.record("find_by_user_id");
        self.inner.find_by_user_id(user_id).await
    }

    async fn update(
        &self,
        register: &Register,
        sets: &RegisterUpdate,
    ) -> Result<Register, AppError> {
        self.record("update");
        self.inner.update(register, sets).await
    }

    async fn delete_by_id(&self, session_id: &str) -> Result<bool, AppError> {
        self.record("delete_by_id");
        self.inner.delete_by_id(session_id).await
    }

    async fn delete_by_user_id(&self, user_id: &str) -> Result<bool, AppError> {
        self.record("delete_by_user_id");
        self.inner.delete_by_user_id(user_id).await
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}

/// Engine that suspends after every read, so concurrent callers interleave
/// between loading a register and writing it back.
///
/// Conditional writes go to `MemoryEngine`'s atomic implementation.
#[derive(Clone, Default)]
pub struct YieldingEngine {
    inner: Arc<MemoryEngine>,
    conditional_writes: Arc<Mutex<Vec<bool>>>,
}

impl YieldingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome of every `compare_and_update` call, in order
    pub fn conditional_writes(&self) -> Vec<bool> {
        self.conditional_writes.lock().clone()
    }
}

#[async_trait]
impl StorageEngine for YieldingEngine {
    async fn create(&self, register: Register) -> Result<Register, AppError> {
        self.inner.create(register).await
    }

    async fn find_by_id(&self, session_id: &str) -> Result<Register, AppError> {
        let register = self.inner.find_by_id(session_id).await;
        tokio::task::yield_now().await;
        register
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<Register>, AppError> {
        self.inner.find_by_user_id(user_id).await
    }

    async fn update(
        &self,
        register: &Register,
        sets: &RegisterUpdate,
    ) -> Result<Register, AppError> {
        self.inner.update(register, sets).await
    }

    async fn compare_and_update(
        &self,
        session_id: &str,
        expected_refresh_at: Option<i64>,
        sets: &RegisterUpdate,
    ) -> Result<Option<Register>, AppError> {
        let updated = self
            .inner
            .compare_and_update(session_id, expected_refresh_at, sets)
            .await?;
        self.conditional_writes.lock().push(updated.is_some());
        Ok(updated)
    }

    async fn delete_by_id(&self, session_id: &str) -> Result<bool, AppError> {
        self.inner.delete_by_id(session_id).await
    }

    async fn delete_by_user_id(&self, user_id: &str) -> Result<bool, AppError> {
        self.inner.delete_by_user_id(user_id).await
    }

    fn name(&self) -> &'static str {
        "Yielding"
    }
}
