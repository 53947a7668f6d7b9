pub mod digest;
pub mod dispatch;
pub mod worker;

pub use digest::{build_digests, UserDigest};
pub use dispatch::{in_app_channel, InAppDispatcher, RedisInAppDispatcher};
pub use worker::AggregationWorker;
