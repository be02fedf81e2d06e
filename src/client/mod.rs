//! Connection management: the connection task, its command queue and the
//! public [`InsightPump`] handle.

mod config;
mod handles;
mod pump;
mod queue;

pub use config::{PumpConfig, PumpConfigBuilder};
pub use pump::{ConnectionLock, InsightPump, PumpBuilder, PumpStatus, StateReceiver};
pub use queue::{CommandQueue, CommandRequest, NextStep, QueueState};
