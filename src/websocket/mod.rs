pub mod connection;
pub mod handler;
pub mod relay;
pub mod types;

pub use connection::ConnectionManager;
pub use handler::ws_handler;
pub use relay::run_in_app_relay;
