//! Edge cache coherence for published sites

pub mod edge;
pub mod invalidator;

pub use edge::{EdgeCache, HttpEdgeCache, MemoryEdgeCache};
pub use invalidator::{site_namespace, CacheInvalidator, CacheOptions};
