//! Async orchestration for the tracemesh telemetry pipeline: the fast-path consumer (C6),
//! the priority-routed worker pool (C7), and the backpressure monitor (C8), wired together
//! by [`Supervisor`]. Stream and storage mechanics live in `tracemesh-stream` /
//! `tracemesh-store`; derivation logic lives in `tracemesh-engine`. This crate is the
//! scheduling layer on top of both.

mod backpressure;
mod error;
mod fastpath;
mod handles;
mod supervisor;
mod workers;

pub use error::{Error, Result};
pub use handles::Handles;
pub use supervisor::Supervisor;
pub use workers::WorkerClass;
