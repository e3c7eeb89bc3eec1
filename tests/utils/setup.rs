use std::sync::{Arc, Once};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use rauth::{
    ConnectionStore, EngineOptions, EngineRegistry, MemoryEngine, SessionControl,
    SessionControlConfig, StorageEngine, TokenCodecConfig,
};

use super::mocks::{CountingEngine, RecordingListener};

pub const TEST_SECRET: &str = "integration-test-secret";

static TRACING: Once = Once::new();

/// Installs a test subscriber honoring `RUST_LOG`, once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestSetup {
    pub control: SessionControl,
    pub listener: RecordingListener,
    pub counting_engine: Option<CountingEngine>,
}

pub struct TestSetupBuilder {
    token: TokenCodecConfig,
    counting: bool,
    engine: Option<Arc<dyn StorageEngine>>,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            token: TokenCodecConfig::new().with_secret(TEST_SECRET),
            counting: false,
            engine: None,
        }
    }

    pub fn with_token_config(mut self, token: TokenCodecConfig) -> Self {
        self.token = token;
        self
    }

    pub fn with_access_token_expires(mut self, expires: Duration) -> Self {
        self.token = self.token.with_access_token_expires(expires);
        self
    }

    /// Stores registers through a `CountingEngine` instead of `Memory`
    pub fn with_counting_engine(mut self) -> Self {
        self.counting = true;
        self
    }

    /// Stores registers through `engine` instead of `Memory`
    pub fn with_engine(mut self, engine: Arc<dyn StorageEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> TestSetup {
        init_tracing();

        let registry = EngineRegistry::with_defaults();
        let mut config = SessionControlConfig::new(self.token);
        let counting_engine = self.counting.then(CountingEngine::new);
        let engine = match (&counting_engine, self.engine) {
            (Some(counting), _) => Some(Arc::new(counting.clone()) as Arc<dyn StorageEngine>),
            (None, engine) => engine,
        };
        config = match engine {
            Some(engine) => config.with_store(ConnectionStore::from_engine(engine)),
            None => config.with_engine(MemoryEngine::NAME, EngineOptions::new()),
        };

        let control =
            SessionControl::new(config, &registry).expect("session control should build");
        let listener = RecordingListener::new();
        control.on(listener.clone());

        TestSetup {
            control,
            listener,
            counting_engine,
        }
    }
}
