pub mod listener;
pub mod outbox;
pub mod reconcile;

pub use listener::{ExpiryListener, RetryPolicy};
pub use outbox::Outbox;
pub use reconcile::{start_reconciliation, Reconciler};
