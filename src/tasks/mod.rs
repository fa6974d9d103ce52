//! Ready-made [`Task`](crate::core::Task) implementations.

pub mod read;

pub use read::ReadTask;
