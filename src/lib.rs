//! 8250/16550 UART Request Engine
//!
//! A `no_std` Rust implementation of an interrupt-driven serial port
//! request engine for the 8250/16550 UART family.
//!
//! This crate provides the full request pipeline of a serial port driver -
//! reads, writes, event waits, flow control, timeouts, and cancellation -
//! over a small register abstraction, so the same engine runs on
//! port-mapped PC UARTs, memory-mapped SoC UARTs, and a host-side mock.
//!
//! # Architecture
//!
//! The engine is organized into three layers:
//!
//! 1. **Driver Layer** ([`driver`]): the [`Port`] request engine with its
//!    read/write pipelines, flow control, and interrupt service
//! 2. **HAL Layer** ([`hal`]): the [`UartDevice`] register contract
//! 3. **Sync Layer** ([`sync`]): ISR-safe sharing via `critical-section`
//!
//! # Execution model
//!
//! Three contexts cooperate on one [`Port`]:
//!
//! - **Dispatch** submits requests and consumes completions.
//! - **Interrupt** runs [`Port::handle_interrupt`], which drains every
//!   asserted cause and never blocks.
//! - **Deferred** runs [`Port::poll`] with a millisecond timestamp; it
//!   fires timers and delivers completions.
//!
//! Wrapped in [`SharedPort`](sync::SharedPort), every entry point runs
//! inside a `critical_section`, which is the mutual exclusion the
//! ISR/dispatch handoff protocol requires.
//!
//! # Features
//!
//! - `defmt`: Enable defmt formatting and logging
//! - `critical-section`: Enable the ISR-safe [`SharedPort`](sync::SharedPort) wrapper
//! - `async`: Enable async/await submission wrappers with wakers
//!
//! # Example
//!
//! ```ignore
//! use serial16550::{Port, PortConfig, Instant};
//!
//! let mut port = Port::new(my_uart);
//! port.init(PortConfig::new().with_baud(115_200))?;
//!
//! let write_id = port.write(Instant::from_millis(0), b"AT\r\n")?;
//!
//! // From the UART interrupt handler:
//! //   port.handle_interrupt();
//! // From the platform timer / worker:
//! //   port.poll(now);
//!
//! while let Some(done) = port.take_completion() {
//!     // done.id == write_id, done.bytes_transferred == 4
//! }
//! ```

#![no_std]
#![deny(missing_docs)]
#![allow(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]
// Clippy lint levels live here; thresholds and config are in Cargo.toml.
#![deny(clippy::correctness)]
#![warn(
    clippy::suspicious,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::cloned_instead_of_copied,
    clippy::explicit_iter_loop,
    clippy::implicit_clone,
    clippy::inconsistent_struct_constructor,
    clippy::manual_assert,
    clippy::manual_let_else,
    clippy::match_same_arms,
    clippy::needless_pass_by_value,
    clippy::semicolon_if_nothing_returned,
    clippy::uninlined_format_args,
    clippy::unnested_or_patterns,
    clippy::std_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::alloc_instead_of_core
)]
#![allow(
    clippy::mod_module_files,
    clippy::self_named_module_files,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::struct_excessive_bools,
    clippy::fn_params_excessive_bools,
    clippy::type_complexity,
    clippy::must_use_candidate,
    clippy::assertions_on_constants,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::panic_in_result_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::items_after_statements,
    clippy::let_underscore_future
)]

extern crate alloc;

// =============================================================================
// Modules
// =============================================================================

pub mod driver;
pub mod hal;

// Internal implementation details (pub(crate) only)
mod internal;

#[cfg(feature = "critical-section")]
pub mod sync;

// Test utilities (only available during testing)
#[cfg(test)]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use driver::config::{
    CommProperties, CommStatus, DtrMode, FifoConfig, HandFlow, LineConfig, Parity,
    PortConfig, RtsMode, RxTrigger, SpecialChars, State, Stats, StopBits, Timeouts,
    WordLength,
};
pub use driver::error::{
    ConfigError, ConfigResult, Error, IoError, IoResult, QueueError, QueueResult, Result,
};
pub use driver::isr::IsrSummary;
pub use driver::port::Port;
pub use driver::request::{Completion, CompletionKind, CompletionStatus, RequestId};

pub use hal::uart::{UartDevice, UartRegister};

pub use internal::timer::{Duration, Instant};

// Re-export sync types when critical-section is enabled
#[cfg(feature = "critical-section")]
pub use sync::SharedPort;

// Re-export async types when the async feature is enabled
#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
pub use sync::asynch::AsyncSharedPort;

/// Bit-mask vocabularies used across the request surface.
///
/// These are grouped into a dedicated module to keep the top-level facade
/// focused on driver types.
pub mod masks {
    pub use crate::driver::config::comm_error;
    pub use crate::driver::flow::{rxhold, txhold};
    pub use crate::driver::port::purge;
    pub use crate::driver::wait::event;
}
