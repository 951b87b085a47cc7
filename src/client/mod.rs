//! Websocket client for one room membership: connection state machine,
//! local room view and automatic reconnect.

mod connection;
mod session;

pub use connection::{ClassroomClient, ClientEvent, ReconnectPolicy};
pub use session::{check_outbound, ClientSession, ConnectionState, JoinRejection, RoomView};
