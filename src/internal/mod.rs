//! Internal Implementation Details
//!
//! This module contains implementation details that are not part of the public API.
//! Types in this module may change without notice between minor versions.
//!
//! # Contents
//!
//! - [`ring`]: the interrupt-to-consumer byte ring
//! - [`timer`]: millisecond time base and the named one-shot timers
//!
//! # Stability
//!
//! **WARNING:** Apart from the [`timer::Instant`] and [`timer::Duration`]
//! time primitives re-exported at the crate root, nothing here is public
//! API.

pub(crate) mod ring;
pub(crate) mod timer;
