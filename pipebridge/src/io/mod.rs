//! Side-effecting parts of the bridge: pipes, processes, relays, endpoints,
//! configuration.

pub mod config;
pub mod endpoint;
pub mod launch;
pub mod pipes;
pub mod process;
pub mod relay;
pub mod shutdown;
