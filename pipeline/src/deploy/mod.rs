//! Deployment management
//!
//! A deployment publishes the artifacts of a completed build under a new,
//! per-site monotonic version and then promotes it to live.

pub mod locks;
pub mod manager;

pub use locks::SiteLocks;
pub use manager::{DeployOptions, DeploymentManager, DeploymentRequest};
