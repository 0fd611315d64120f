//! Hardware Abstraction Layer
//!
//! The engine is hardware-agnostic: everything it needs from the platform is
//! expressed as the [`uart::UartDevice`] register contract plus the
//! millisecond timestamps fed into [`Port::poll`](crate::Port::poll).
//! Interrupt masking is injected through the `critical-section` crate when
//! the `critical-section` feature is enabled.
//!
//! # Modules
//!
//! - [`uart`]: the 8250/16550 register file contract and bit definitions

pub mod uart;

// Re-export commonly used types
pub use uart::{UartDevice, UartRegister};
