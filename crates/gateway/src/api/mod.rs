//! REST handlers: a thin translation layer over the stores and the
//! supervisor.

pub mod auth;
pub mod instances;
pub mod permissions;
pub mod secrets;
pub mod servers;
pub mod workspaces;
