//! # Courier
//!
//! Message-oriented client/server communication. Peers exchange typed
//! messages over a byte stream; each received message is executed against
//! per-connection state, and whatever it returns is sent back.
//!
//! ## Layers
//!
//! ```text
//! courier            ← Connection (4 workers + mailbox), Server, builders
//!   ├ courier-tick       ← recurring tasks
//!   ├ courier-auth       ← Authenticator contract
//!   └ courier-transport  ← frames, message readers/writers, TCP listener
//!       └ courier-protocol ← envelope codec, message registry
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use courier::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! #[serde(default)]
//! struct Ping {
//!     n: u32,
//! }
//!
//! impl MessageType for Ping {
//!     const IDENTIFIER: &'static str = "Ping";
//! }
//!
//! #[derive(Debug, Clone)]
//! enum Wire {
//!     Ping(Ping),
//! }
//!
//! impl From<Ping> for Wire {
//!     fn from(p: Ping) -> Self {
//!         Wire::Ping(p)
//!     }
//! }
//!
//! impl Message for Wire {
//!     type Context = ();
//!
//!     fn execute(&self, _: &mut ()) -> Option<Self> {
//!         match self {
//!             Wire::Ping(Ping { n }) if *n > 0 => Some(Wire::Ping(Ping { n: n - 1 })),
//!             Wire::Ping(_) => None,
//!         }
//!     }
//!
//!     fn to_wire(&self) -> Result<WireFields, ProtocolError> {
//!         match self {
//!             Wire::Ping(p) => WireFields::of(p),
//!         }
//!     }
//! }
//!
//! # async fn run() -> Result<(), CourierError> {
//! let registry = MessageRegistry::<Wire>::new().register::<Ping>()?;
//! let server = Server::builder()
//!     .with_config(ServerConfig::bind("0.0.0.0:7777"))
//!     .with_connection_builder(
//!         ConnectionBuilder::new()
//!             .with_message_registry(registry)
//!             .with_default_context()
//!             .with_emergency_stop(),
//!     )
//!     .build()
//!     .await?;
//! server.start();
//! # Ok(())
//! # }
//! ```

mod builder;
mod config;
mod connection;
mod error;
mod mailbox;
mod server;
mod worker;

pub use builder::ConnectionBuilder;
pub use config::{ConnectionConfig, ServerConfig};
pub use connection::{
    Connection, ConnectionCallback, ContextFactory, ContextualTask, ErrorCallback,
};
pub use error::CourierError;
pub use mailbox::Mailbox;
pub use server::{
    Server, ServerBuilder, ServerCallback, ServerConnectionCallback, ServerContextualTask,
};

pub use courier_auth as auth;
pub use courier_protocol as protocol;
pub use courier_tick as tick;
pub use courier_transport as transport;

/// Re-exports for typical applications.
pub mod prelude {
    pub use crate::{
        Connection, ConnectionBuilder, ConnectionConfig, CourierError, Server, ServerBuilder,
        ServerConfig,
    };
    pub use courier_auth::{AuthError, Authenticator, Credentials};
    pub use courier_protocol::{
        Envelope, Message, MessageRegistry, MessageType, ProtocolError, WireFields,
    };
    pub use courier_tick::{RecurringTask, TaskHandle, TaskState};
    pub use courier_transport::{
        ConnectionId, JsonMessageIoFactory, MessageIoFactory, MessageReader, MessageWriter,
        TransportError,
    };
}
