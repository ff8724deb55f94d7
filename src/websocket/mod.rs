pub mod handler;
pub mod protocol;
pub mod server;

pub use handler::{dispatch, WebSocketHandler, WS_PATH};
pub use protocol::ClientMessage;
pub use server::run_websocket_server;
