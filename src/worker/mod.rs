pub mod pool;

pub use pool::{MessageHandler, PoolOptions, WorkerPool};
