//! # Hostrun
//!
//! The agent that sits inside a managed host process and lets remote
//! inspectors query it over a WebSocket control channel.
//!
//! Each connection is a session with its own execution context. The registry
//! maps connections to sessions and is the only state shared between the
//! connection tasks and the log tail that broadcasts to all of them.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod framing;
pub mod inspect;
pub mod logtail;
pub mod mock_transport;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use context::ContextProvider;
pub use context::Event;
pub use context::ExecutionContext;
pub use dispatch::Dispatcher;
pub use inspect::IntrospectionProvider;
pub use logtail::LogToggle;
pub use registry::BroadcastReport;
pub use registry::Registry;
pub use service::Agent;
pub use session::ConnectionId;
pub use session::SessionState;
pub use transport::Transport;
