// Storage engine contract, engine registry and the connection store facade

// Public API - what other modules can use
pub use connection::ConnectionStore;
pub use engine::{EngineOptions, StorageEngine};
pub use memory::MemoryEngine;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEngine;
pub use register::{Meta, Mode, Register, RegisterUpdate};
pub use registry::{EngineConstructor, EngineRegistry};

// Internal modules
mod connection;
mod engine;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod register;
mod registry;
