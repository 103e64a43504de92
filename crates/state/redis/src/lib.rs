mod config;
mod key_render;
mod lock;
mod scripts;
mod store;

pub use config::RedisConfig;
pub use key_render::render_key;
pub use lock::{RedisDistributedLock, RedisLockGuard};
pub use store::RedisStateStore;
