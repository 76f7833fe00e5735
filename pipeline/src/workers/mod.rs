//! Background workers

pub mod pool;
pub mod promoter;

pub use pool::{JobHandle, PoolStats, WorkerPool};
