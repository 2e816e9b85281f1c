//! Message pipes with a binary struct codec and typed interface bindings.
//!
//! # Crate Structure
//!
//! - [`transport`]: handles, the pipe primitives trait, and the in-process `LocalCore`
//! - [`codec`]: message headers and the struct codec
//! - [`bindings`]: connectors, proxies, routers and connections
//! - [`demo`]: a small echo interface used by the CLI and tests

pub mod demo;

/// Re-export transport types.
pub mod transport {
    pub use msgpipe_transport::*;
}

/// Re-export codec types.
pub mod codec {
    pub use msgpipe_codec::*;
}

/// Re-export binding types.
pub mod bindings {
    pub use msgpipe_bindings::*;
}
