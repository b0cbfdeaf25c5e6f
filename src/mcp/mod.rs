//! Tool-invocation protocol layer.
//!
//! [`protocol`] decodes and encodes newline-delimited JSON-RPC envelopes,
//! [`registry`] holds the named tools and [`dispatcher`] routes requests to
//! them according to the session lifecycle.

pub mod dispatcher;
pub mod protocol;
pub mod registry;

pub use dispatcher::{Dispatch, Dispatcher, Session, SessionState, SUPPORTED_PROTOCOL_VERSIONS};
pub use protocol::{Request, Response, parse_envelope};
pub use registry::{ToolDescriptor, ToolHandler, ToolLayer, ToolRegistry, ToolRegistryBuilder};
