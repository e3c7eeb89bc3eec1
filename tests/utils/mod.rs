pub mod assertions;
pub mod mocks;
pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use assertions::{assert_session_not_found, assert_stale, decode_access};
#[allow(unused_imports)]
pub use mocks::{CountingEngine, FailingListener, RecordingListener, YieldingEngine};
#[allow(unused_imports)]
pub use setup::{init_tracing, TestSetup, TestSetupBuilder, TEST_SECRET};
