//! Persistence Adapters
//!
//! Implementations of the `CacheStore` port backing the metadata cache's
//! durable layer.

mod in_memory;
mod json_file;

pub use in_memory::InMemoryCacheStore;
pub use json_file::JsonFileCacheStore;
