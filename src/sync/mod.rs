//! ISR-safe sharing for the serial port engine.
//!
//! Available with the `critical-section` feature. The platform provides
//! the `critical_section` implementation (interrupt masking on bare
//! metal, a mutex on hosted targets); [`SharedPort`] then makes one
//! [`Port`](crate::Port) safely reachable from thread context, the UART
//! interrupt handler, and timer callbacks.
//!
//! # Modules
//!
//! - [`primitives`]: the underlying critical-section cell and waker
//! - [`shared`]: the [`SharedPort`] wrapper
//! - [`asynch`]: async submission wrappers (feature `async`)

pub mod primitives;
pub mod shared;

#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
pub mod asynch;

pub use primitives::CriticalSectionCell;
pub use shared::SharedPort;

#[cfg(feature = "async")]
pub use asynch::AsyncSharedPort;
