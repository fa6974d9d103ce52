//! Configuration models for the engine and its worker pool.

pub mod pool;

pub use pool::EngineConfig;
