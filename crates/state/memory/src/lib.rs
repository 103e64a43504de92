mod lock;
mod store;

pub use lock::{MemoryLockGuard, MemoryLockManager};
pub use store::MemoryStateStore;
