pub mod client;
pub mod lease;

pub use client::RedisService;
pub use lease::{Lease, LocalLease, LockError, LockResult, RedisLease, RenditionLock, rendition_key};
