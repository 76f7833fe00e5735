//! HTTP plumbing for external collaborators

pub mod client;

pub use client::HttpClient;
