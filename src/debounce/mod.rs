pub mod coordinator;
pub mod key;
pub mod store;

pub use coordinator::DebounceCoordinator;
pub use key::{DebounceKey, FlushMessage};
pub use store::{DebounceStore, ExpirySource, RedisDebounceStore};
