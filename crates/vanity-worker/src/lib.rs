//! # Vanity Worker
//!
//! Binds to one compute device, leases mining jobs one at a time and
//! supervises the external miner for each of them.
//!
//! - [`parser`] finds the result marker in the miner's output stream
//! - [`controller`] owns one miner process from spawn to exit
//! - [`worker`] turns controller outcomes into queue transitions

pub mod controller;
pub mod parser;
pub mod shutdown;
pub mod worker;

pub use controller::{
    ControllerConfig, ControllerState, ExecutionOutcome, ProcessController, THRESHOLD_ENV,
    ZERO_ADDRESS,
};
pub use parser::ResultParser;
pub use shutdown::{forward_shutdown, shutdown_signal, ShutdownSignal};
pub use worker::{Worker, WorkerSettings, WorkerStats};
