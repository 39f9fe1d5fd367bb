//! Networking: wire protocol, transport abstraction, connection lifecycle

mod connection;
mod protocol;
mod transport;

pub use connection::{ConnState, ConnectionManager};
pub use protocol::{ControlEvent, WireMessage};
pub use transport::{DuplexPair, MessageSink, MessageStream, Transport, WsTransport};
