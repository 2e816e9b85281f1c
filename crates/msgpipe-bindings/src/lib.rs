//! Connectors and typed interface bindings over message pipes.
//!
//! - [`Connector`] drives one pipe handle: synchronous writes, readiness
//!   driven reads, a sticky error flag, and a single close.
//! - [`Router`] and [`Proxy`] are the local and remote halves of an
//!   interface, dispatching by method ordinal.
//! - [`Connection`] binds a connector to one of each.
//!
//! Everything here is single-threaded; callbacks run from the embedding
//! reactor (for [`msgpipe_transport::LocalCore`], `run_until_idle`).

pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod proxy;
pub mod router;

pub use config::{ConnectionConfig, ConnectorConfig};
pub use connection::Connection;
pub use connector::{Connector, ConnectorState, MessageReceiver, WeakConnector};
pub use error::{BindingsError, Result};
pub use proxy::Proxy;
pub use router::{LocalStub, Responder, Router};
