//! HTTP API, WebSocket event fan-out, and the MCP reverse proxy, plus the
//! host shell that wires every subsystem together.

pub mod api;
pub mod proxy;
pub mod response;
pub mod server;
pub mod state;
pub mod version_check;
pub mod ws;

pub use {
    server::{build_router, start_host},
    state::HostState,
};
