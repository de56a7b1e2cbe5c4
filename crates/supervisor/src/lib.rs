//! Subprocess lifecycle management: port allocation, environment
//! composition, spawning, readiness probing, health watching, and bounded
//! crash recovery.

pub mod command;
pub mod env;
pub mod install;
pub mod instance;
pub mod logs;
pub mod ports;
pub mod probe;
pub mod supervisor;

pub use {
    instance::{InstanceKey, InstanceMetadata, InstanceSnapshot, InstanceStatus},
    ports::PortAllocator,
    supervisor::ProcessSupervisor,
};
