pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod observability;
pub mod protocol;
pub mod state;
pub mod stream;
pub mod transport;
