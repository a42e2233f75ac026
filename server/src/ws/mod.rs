pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod session;

pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, ConnectionSender, SendFailure};
