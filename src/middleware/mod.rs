pub mod identity;

pub use identity::{AuthUser, USER_ID_HEADER};
