//! Lifecycle state machines for builds, deployments and domains

pub mod build;
pub mod deployment;
pub mod domain;

pub use build::{BuildEvent, BuildFsm};
pub use deployment::{DeploymentEvent, DeploymentFsm};
pub use domain::{DomainEvent, DomainFsm};
