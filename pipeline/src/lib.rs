//! Sitepipe Library
//!
//! Release pipeline for hosted sites: build orchestration, versioned
//! deployments with promotion and rollback, custom domain provisioning and
//! edge cache invalidation.

pub mod app;
pub mod blob;
pub mod builder;
pub mod cache;
pub mod deploy;
pub mod domains;
pub mod errors;
pub mod filesys;
pub mod fsm;
pub mod http;
pub mod logs;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;

pub use errors::{PipelineError, PipelineResult};
pub use pipeline::{Collaborators, Pipeline, PipelineOptions};
