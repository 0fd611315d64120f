//! Event waits for the serial port engine.
//!
//! A client arms a subscription mask with [`Port::set_wait_mask`] and then
//! submits a wait with [`Port::wait_on_mask`]. Interrupt-level code notes
//! events into a history mask restricted to the subscription; the first
//! noted event publishes the accumulated history into the pending wait and
//! completes it.
//!
//! Events observed while no wait is pending are buffered in the history
//! mask and delivered to the *next* wait the moment it is armed. Cancelling
//! a wait leaves the history mask intact; changing the subscription mask
//! clears it.

use super::error::QueueError;
use super::port::{Dpc, Port};
use super::request::{CompletionStatus, Owners, Request, RequestBody, RequestId};
use crate::hal::uart::UartDevice;

// =============================================================================
// Event Bits
// =============================================================================

/// Wait event mask bits
pub mod event {
    /// A character was received
    pub const RXCHAR: u32 = 0x0001;
    /// The event character was received
    pub const RXFLAG: u32 = 0x0002;
    /// The transmitter went fully idle
    pub const TXEMPTY: u32 = 0x0004;
    /// CTS changed state
    pub const CTS: u32 = 0x0008;
    /// DSR changed state
    pub const DSR: u32 = 0x0010;
    /// DCD (receive line signal detect) changed state
    pub const RLSD: u32 = 0x0020;
    /// A break was received
    pub const BREAK: u32 = 0x0040;
    /// A line status error occurred
    pub const ERR: u32 = 0x0080;
    /// A trailing ring indicator edge was seen
    pub const RING: u32 = 0x0100;
    /// Printer error (never generated by this hardware; accepted in masks
    /// for compatibility)
    pub const PERR: u32 = 0x0200;
    /// The RX ring crossed 80% occupancy
    pub const RX80FULL: u32 = 0x0400;
    /// Provider-specific event 1
    pub const EVENT1: u32 = 0x0800;
    /// Provider-specific event 2
    pub const EVENT2: u32 = 0x1000;

    /// Every bit a mask may contain
    pub const ALL: u32 = RXCHAR
        | RXFLAG
        | TXEMPTY
        | CTS
        | DSR
        | RLSD
        | BREAK
        | ERR
        | RING
        | PERR
        | RX80FULL
        | EVENT1
        | EVENT2;
}

// =============================================================================
// Wait Matcher Implementation
// =============================================================================

impl<U: UartDevice> Port<U> {
    /// Get the current event subscription mask.
    #[inline(always)]
    pub fn wait_mask(&self) -> u32 {
        self.isr_wait_mask
    }

    /// Replace the event subscription mask.
    ///
    /// A pending wait is completed immediately with `Success` and an empty
    /// event word, and any buffered history is discarded.
    ///
    /// # Errors
    /// - `InvalidLength` - the mask contains unknown bits
    pub fn set_wait_mask(&mut self, mask: u32) -> crate::driver::error::Result<()> {
        if mask & !event::ALL != 0 {
            return Err(QueueError::InvalidLength.into());
        }

        if let Some(mut req) = self.wait_slot.take() {
            req.events = 0;
            self.finish_request(req, CompletionStatus::Success);
        }

        self.isr_wait_mask = mask;
        self.history_mask = 0;
        self.wait_published = false;
        Ok(())
    }

    /// Submit a wait against the armed subscription mask.
    ///
    /// Completes as soon as any subscribed event occurs; events buffered
    /// since the last wait complete it immediately.
    ///
    /// # Errors
    /// - `NoWaitMask` - no subscription mask is armed
    /// - `WaitAlreadyPending` - another wait is outstanding
    pub fn wait_on_mask(&mut self) -> crate::driver::error::Result<RequestId> {
        self.check_running()?;
        if self.isr_wait_mask == 0 {
            return Err(QueueError::NoWaitMask.into());
        }
        if self.wait_slot.is_some() {
            return Err(QueueError::WaitAlreadyPending.into());
        }

        let id = self.alloc_id();
        let mut req = Request::new(id, RequestBody::Wait);
        req.owners.set(Owners::CANCEL);
        self.wait_published = false;
        self.wait_slot = Some(req);

        // Deliver anything that happened between waits right away.
        if self.history_mask != 0 {
            self.publish_wait_events();
            // The publication rides the deferred queue; the caller sees the
            // completion on the next poll.
        }

        Ok(id)
    }

    /// Record `bits` into the history, restricted to the subscription, and
    /// publish into a pending wait.
    ///
    /// Safe to call from any context; publication itself is deferred.
    pub(super) fn note_event(&mut self, bits: u32) {
        let interesting = bits & self.isr_wait_mask;
        if interesting == 0 {
            return;
        }
        self.history_mask |= interesting;
        self.publish_wait_events();
    }

    /// Move the history into the pending wait and schedule its completion.
    pub(super) fn publish_wait_events(&mut self) {
        if self.wait_published || self.history_mask == 0 {
            return;
        }
        let Some(req) = self.wait_slot.as_mut() else {
            return;
        };

        req.events = self.history_mask;
        self.history_mask = 0;
        self.wait_published = true;
        self.deferred.push_back(Dpc::WaitComplete);
    }

    /// Deferred completion of a published wait.
    pub(super) fn complete_wait(&mut self) {
        if let Some(req) = self.wait_slot.take() {
            self.finish_request(req, CompletionStatus::Success);
        }
        self.wait_published = false;
    }

    /// Cancel path for a pending wait: history stays buffered for the next
    /// arming.
    pub(super) fn cancel_wait(&mut self) {
        if let Some(mut req) = self.wait_slot.take() {
            req.events = 0;
            self.finish_request(req, CompletionStatus::Cancelled);
        }
        self.wait_published = false;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::event;

    #[test]
    fn event_bits_match_wire_values() {
        assert_eq!(event::RXCHAR, 0x0001);
        assert_eq!(event::RXFLAG, 0x0002);
        assert_eq!(event::TXEMPTY, 0x0004);
        assert_eq!(event::CTS, 0x0008);
        assert_eq!(event::DSR, 0x0010);
        assert_eq!(event::RLSD, 0x0020);
        assert_eq!(event::BREAK, 0x0040);
        assert_eq!(event::ERR, 0x0080);
        assert_eq!(event::RING, 0x0100);
        assert_eq!(event::PERR, 0x0200);
        assert_eq!(event::RX80FULL, 0x0400);
        assert_eq!(event::EVENT1, 0x0800);
        assert_eq!(event::EVENT2, 0x1000);
    }

    #[test]
    fn all_covers_every_bit() {
        assert_eq!(event::ALL, 0x1FFF);
    }
}

// =============================================================================
// Bench Tests
// =============================================================================
