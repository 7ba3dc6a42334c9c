pub mod buffer;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod pager;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::RelayError;
pub use handlers::Relay;
pub use server::{start, ServerConfig, ServerHandle};
