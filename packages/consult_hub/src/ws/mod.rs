//! WebSocket surface of the hub.
//!
//! One connection per participant, multiplexing any number of session rooms.
//! The envelope protocol lives in `protocol`, routing in `dispatch`, and the
//! business orchestration in `hub`.

pub(crate) mod dispatch;
mod handler;
mod hub;
pub(crate) mod protocol;
pub(crate) mod registry;
pub(crate) mod rooms;

pub use handler::{chat_websocket_handler, handle_chat_ws};
pub use hub::{ChatHub, EndedBy};
pub use protocol::{ClientEvent, Envelope, ServerMessage};
pub use registry::{ClientHandle, ConnectionRegistry};
pub use rooms::RoomRegistry;
