//! Core serial port engine components.
//!
//! This module contains the building blocks for configuring and operating
//! the serial port request engine.
//!
//! # Overview
//!
//! - [`config`]: Configuration types and builder patterns
//! - [`error`]: Error types and result aliases
//! - [`port`]: The main [`Port`] implementation and control plane
//! - [`request`]: Request identity, ownership, and completions
//! - [`read`]: The read pipeline
//! - [`write`]: The write pipeline, flush, immediate char, xoff counter
//! - [`flow`]: The modem/flow-control state machine
//! - [`isr`]: Interrupt service
//! - [`wait`]: Event waits
//!
//! # Usage
//!
//! ```ignore
//! use serial16550::{Port, PortConfig};
//!
//! let mut port = Port::new(device);
//! port.init(PortConfig::new().with_baud(115_200))?;
//! let id = port.read(now, 64)?;
//! ```

// Submodules
pub mod config;
pub mod error;
pub mod flow;
pub mod isr;
pub mod port;
pub mod read;
pub mod request;
pub mod wait;
pub mod write;

// Re-exports for convenience
pub use config::{
    CommProperties, CommStatus, DtrMode, FifoConfig, HandFlow, LineConfig, Parity,
    PortConfig, RtsMode, RxTrigger, SpecialChars, State, Stats, StopBits, Timeouts,
    WordLength, comm_error,
};
pub use error::{
    ConfigError, ConfigResult, Error, IoError, IoResult, QueueError, QueueResult, Result,
};
pub use isr::IsrSummary;
pub use port::{Port, purge};
pub use request::{Completion, CompletionKind, CompletionStatus, RequestId};
pub use wait::event;
