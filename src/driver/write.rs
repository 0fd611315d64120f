//! The write pipeline: writes, flushes, immediate characters, and the
//! xoff counter.
//!
//! Writes queue FIFO and are fed to the hardware by the transmit
//! interrupt, a FIFO's worth per holding-register-empty. A flush is a
//! zero-byte write that completes the moment it reaches the queue head. An
//! xoff counter starts life as a one-byte write of its xoff character and,
//! once that byte is on the wire, turns into a countdown against received
//! bytes with its own deadline - aborted by any newer write.

use alloc::vec::Vec;

use super::port::Port;
use super::request::{CompletionStatus, Owners, Request, RequestBody, RequestId};
use crate::driver::config::RtsMode;
use crate::driver::error::{IoError, QueueError, Result};
use crate::hal::uart::UartDevice;
use crate::internal::timer::TimerId;
use crate::{Duration, Instant};

impl<U: UartDevice> Port<U> {
    // =========================================================================
    // Submission
    // =========================================================================

    /// Submit a write of `data`.
    ///
    /// Writes transmit in submission order. The completion reports the
    /// bytes that reached the hardware; a configured write timeout bounds
    /// the wait, snapshot at submission.
    ///
    /// # Errors
    /// - `InvalidState` - port not running
    /// - `OutOfMemory` - request buffer allocation failed
    pub fn write(&mut self, now: Instant, data: &[u8]) -> Result<RequestId> {
        self.check_running()?;
        let id = self.alloc_id();

        if data.is_empty() {
            let req = Request::new(id, RequestBody::Write { data: Vec::new() });
            self.finish_request(req, CompletionStatus::Success);
            return Ok(id);
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(data.len())
            .map_err(|_| IoError::OutOfMemory)?;
        buf.extend_from_slice(data);

        let req = Request::new(id, RequestBody::Write { data: buf });
        self.total_chars_queued += data.len();

        if self.write_slot.enqueue_or_start(req) {
            self.start_current_write(now);
        }
        Ok(id)
    }

    /// Submit a flush: completes once every earlier write has drained to
    /// the hardware.
    ///
    /// # Errors
    /// - `InvalidState` - port not running
    pub fn flush(&mut self, now: Instant) -> Result<RequestId> {
        self.check_running()?;
        let id = self.alloc_id();
        let req = Request::new(id, RequestBody::Flush);

        if self.write_slot.enqueue_or_start(req) {
            self.start_current_write(now);
        }
        Ok(id)
    }

    /// Submit a single byte to transmit ahead of any queued write data.
    ///
    /// The byte still honors hardware handshake holds and break, but not
    /// an XOFF hold. Bounded by the write timeouts for one byte.
    ///
    /// # Errors
    /// - `InvalidState` - port not running
    /// - `ImmediatePending` - another immediate character is outstanding
    pub fn immediate_char(&mut self, now: Instant, ch: u8) -> Result<RequestId> {
        self.check_running()?;
        if self.immediate_slot.is_some() {
            return Err(QueueError::ImmediatePending.into());
        }

        let id = self.alloc_id();
        let mut req = Request::new(id, RequestBody::Immediate { ch });
        req.owners.set(Owners::CANCEL);
        req.owners.set(Owners::ISR);

        let t = self.config.timeouts;
        if t.write_total_constant != 0 || t.write_total_multiplier != 0 {
            let total = Duration::from_millis(
                u64::from(t.write_total_multiplier) + u64::from(t.write_total_constant),
            );
            req.owners.set(Owners::TOTAL_TIMER);
            self.timers.arm(TimerId::ImmediateTotal, now.plus(total));
        }

        self.immediate_slot = Some(req);
        self.immediate_byte = ch;
        self.transmit_immediate = true;

        if self.holding_empty && (self.tx_holding & !super::flow::txhold::XOFF) == 0 {
            self.kick_transmit();
        }
        Ok(id)
    }

    /// Submit an xoff counter: emit `xoff_char`, then complete when
    /// `count` further bytes have been received, when `timeout`
    /// milliseconds pass (`CounterTimeout`), or when a newer write arrives
    /// (`MoreWrites`).
    ///
    /// # Errors
    /// - `InvalidState` - port not running
    /// - `InvalidLength` - `count` is zero
    pub fn xoff_counter(
        &mut self,
        now: Instant,
        xoff_char: u8,
        count: u32,
        timeout: Option<u32>,
    ) -> Result<RequestId> {
        self.check_running()?;
        if count == 0 {
            return Err(QueueError::InvalidLength.into());
        }

        let id = self.alloc_id();
        let req = Request::new(
            id,
            RequestBody::XoffCounter {
                xoff_char,
                count,
                timeout,
                counting: false,
            },
        );
        self.total_chars_queued += 1;

        if self.write_slot.enqueue_or_start(req) {
            self.start_current_write(now);
        }
        Ok(id)
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// Start whatever is current on the write queue, completing flushes
    /// inline, or note the transmitter idle when the queue is empty.
    pub(super) fn start_current_write(&mut self, now: Instant) {
        if self.state == super::config::State::Gone {
            return;
        }
        loop {
            if self.write_slot.current.is_none() {
                self.process_empty_transmit();
                return;
            }
            let current = self.write_slot.current.as_ref().unwrap();

            // A flush at the head has, by construction, nothing ahead of
            // it.
            if matches!(current.body, RequestBody::Flush) {
                let (done, _) = self.write_slot.finish_current();
                if let Some(req) = done {
                    self.finish_request(req, CompletionStatus::Success);
                }
                continue;
            }

            // Any newer write-side work kills a counting xoff counter.
            if self.xoff_slot.is_some() {
                self.abort_xoff_counter(now, CompletionStatus::MoreWrites);
            }

            let current = self.write_slot.current.as_ref().unwrap();
            let len = match &current.body {
                RequestBody::Write { data } => data.len(),
                RequestBody::XoffCounter { .. } => 1,
                _ => return,
            };

            let t = self.config.timeouts;
            let use_timer = t.write_total_constant != 0 || t.write_total_multiplier != 0;

            if let Some(req) = self.write_slot.current.as_mut() {
                req.owners = Owners::none();
                req.owners.set(Owners::CANCEL);
                req.owners.set(Owners::ISR);
                if use_timer {
                    req.owners.set(Owners::TOTAL_TIMER);
                }
            }

            if use_timer {
                let total = Duration::from_millis(
                    len as u64 * u64::from(t.write_total_multiplier)
                        + u64::from(t.write_total_constant),
                );
                self.timers.arm(TimerId::WriteTotal, now.plus(total));
            }

            // Give the bytes to the interrupt service.
            self.write_remaining = len;

            if self.config.handflow.rts == RtsMode::TransmitToggle {
                self.raise_rts();
            }

            // With no immediate character in the way, a fresh
            // transmit-empty interrupt starts the pipeline.
            if !self.transmit_immediate && self.holding_empty {
                self.kick_transmit();
            }
            return;
        }
    }

    /// Satisfy a tx-empty wait and begin the RTS lowering sequence once
    /// the whole write side is idle.
    pub(super) fn process_empty_transmit(&mut self) {
        let idle = !self.transmit_immediate
            && self.write_slot.current.is_none()
            && self.write_slot.queue.is_empty();
        if !idle {
            return;
        }

        if self.isr_wait_mask & super::wait::event::TXEMPTY != 0 && self.emptied_transmit {
            self.emptied_transmit = false;
            self.note_event(super::wait::event::TXEMPTY);
        }

        // Transmit toggle drops RTS one character-time after the line
        // goes quiet, re-checking for late work when the delay expires.
        if self.config.handflow.rts == RtsMode::TransmitToggle {
            self.rts_lower_count += 1;
            self.deferred.push_back(super::port::Dpc::StartTimerLowerRts);
        }
    }

    // =========================================================================
    // Completion Protocol
    // =========================================================================

    /// Revoke interrupt-service ownership of the current write, computing
    /// the transfer count from what was actually fed to the hardware.
    pub(super) fn grab_write_from_isr(&mut self) {
        if self.write_remaining == 0 {
            return;
        }
        if let Some(req) = self.write_slot.current.as_mut() {
            if let RequestBody::Write { data } = &req.body {
                req.info = data.len() - self.write_remaining;
            }
            req.owners.clear(Owners::ISR);
        }
        self.write_remaining = 0;
    }

    /// Shared completion protocol for the write side; mirrors the read
    /// side but retires through [`retire_write_request`] so an xoff
    /// counter can change phase instead of completing.
    pub(super) fn try_to_complete_write(
        &mut self,
        now: Instant,
        status: CompletionStatus,
        clear_bit: u8,
        grab: bool,
    ) {
        if self.write_slot.current.is_none() {
            return;
        }

        if let Some(req) = self.write_slot.current.as_mut() {
            req.owners.clear(clear_bit);
            req.owners.clear(Owners::CANCEL);
        }

        if grab {
            self.grab_write_from_isr();
        }

        if self.timers.cancel(TimerId::WriteTotal) {
            if let Some(req) = self.write_slot.current.as_mut() {
                req.owners.clear(Owners::TOTAL_TIMER);
            }
        }

        let released = self
            .write_slot
            .current
            .as_ref()
            .is_some_and(|r| r.owners.is_empty());
        if !released {
            return;
        }

        let (done, _) = self.write_slot.finish_current();
        if let Some(req) = done {
            self.retire_write_request(now, req, status);
        }
        self.start_current_write(now);
    }

    /// Retire a finished write-side request. A successful xoff counter
    /// does not complete here: its emitted byte is on the wire, so it
    /// moves to the counting phase instead.
    fn retire_write_request(&mut self, now: Instant, mut req: Request, status: CompletionStatus) {
        match &mut req.body {
            RequestBody::Write { data } => {
                self.total_chars_queued -= data.len();
                self.finish_request(req, status);
            }
            RequestBody::XoffCounter {
                count,
                timeout,
                counting,
                ..
            } => {
                self.total_chars_queued -= 1;

                if status == CompletionStatus::Success {
                    *counting = true;
                    let count = *count;
                    let timeout = *timeout;

                    req.owners = Owners::none();
                    req.owners.set(Owners::CANCEL);
                    req.owners.set(Owners::ISR);
                    if timeout.is_some() {
                        req.owners.set(Owners::TOTAL_TIMER);
                    }
                    req.info = 0;

                    self.count_since_xoff = count;
                    if let Some(ms) = timeout {
                        self.timers.arm(
                            TimerId::XoffCount,
                            now.plus(Duration::from_millis(u64::from(ms))),
                        );
                    }
                    self.xoff_slot = Some(req);
                } else {
                    self.finish_request(req, status);
                }
            }
            _ => self.finish_request(req, status),
        }
    }

    /// Deferred completion after the ISR drained the write.
    pub(super) fn complete_write_from_isr(&mut self, now: Instant) {
        self.try_to_complete_write(now, CompletionStatus::Success, Owners::ISR, false);
    }

    /// Cancel path for the current write.
    pub(super) fn cancel_current_write(&mut self, now: Instant) {
        self.try_to_complete_write(now, CompletionStatus::Cancelled, Owners::CANCEL, true);
    }

    /// Abort path for the current write (line errors, hardware loss).
    pub(super) fn abort_current_write(&mut self, now: Instant, status: CompletionStatus) {
        self.try_to_complete_write(now, status, Owners::CANCEL, true);
    }

    /// The write's total deadline passed.
    pub(super) fn write_total_timeout(&mut self, now: Instant) {
        self.try_to_complete_write(now, CompletionStatus::Timeout, Owners::TOTAL_TIMER, true);
    }

    // =========================================================================
    // Xoff Counter (counting phase)
    // =========================================================================

    /// Revoke interrupt-service ownership of a counting xoff counter.
    pub(super) fn grab_xoff_from_isr(&mut self) {
        if self.count_since_xoff == 0 {
            return;
        }
        self.count_since_xoff = 0;
        if let Some(req) = self.xoff_slot.as_mut() {
            req.owners.clear(Owners::ISR);
        }
    }

    /// Shared completion protocol for the counting phase.
    fn try_to_complete_xoff(
        &mut self,
        status: CompletionStatus,
        clear_bit: u8,
        grab: bool,
    ) {
        if self.xoff_slot.is_none() {
            return;
        }

        if let Some(req) = self.xoff_slot.as_mut() {
            req.owners.clear(clear_bit);
            req.owners.clear(Owners::CANCEL);
        }

        if grab {
            self.grab_xoff_from_isr();
        }

        if self.timers.cancel(TimerId::XoffCount) {
            if let Some(req) = self.xoff_slot.as_mut() {
                req.owners.clear(Owners::TOTAL_TIMER);
            }
        }

        let released = self.xoff_slot.as_ref().is_some_and(|r| r.owners.is_empty());
        if released {
            if let Some(req) = self.xoff_slot.take() {
                self.finish_request(req, status);
            }
        }
    }

    /// The countdown reached zero (deferred from the RX path).
    pub(super) fn complete_xoff_from_isr(&mut self) {
        self.try_to_complete_xoff(CompletionStatus::Success, Owners::ISR, false);
    }

    /// The counter's own deadline passed.
    pub(super) fn xoff_count_timeout(&mut self) {
        self.try_to_complete_xoff(
            CompletionStatus::CounterTimeout,
            Owners::TOTAL_TIMER,
            true,
        );
    }

    /// Cancel path for a counting xoff counter.
    pub(super) fn cancel_current_xoff(&mut self) {
        self.try_to_complete_xoff(CompletionStatus::Cancelled, Owners::CANCEL, true);
    }

    /// A newer write (or an abort) is displacing the counting xoff.
    pub(super) fn abort_xoff_counter(&mut self, _now: Instant, status: CompletionStatus) {
        if let Some(req) = self.xoff_slot.as_mut() {
            req.owners.set(Owners::XOFF);
            req.info = 0;
        }
        self.try_to_complete_xoff(status, Owners::XOFF, true);
    }

    // =========================================================================
    // Immediate Character (completion)
    // =========================================================================

    /// Revoke interrupt-service ownership of a pending immediate
    /// character.
    ///
    /// Racy by nature: the byte may already have been clocked into the
    /// holding register. The grab wins the bookkeeping either way, so a
    /// cancelled immediate reports `Cancelled` (with zero bytes) even if
    /// the byte subsequently appears on the wire.
    pub(super) fn grab_immediate_from_isr(&mut self) {
        if !self.transmit_immediate {
            return;
        }
        self.transmit_immediate = false;
        if let Some(req) = self.immediate_slot.as_mut() {
            req.owners.clear(Owners::ISR);
        }
    }

    fn try_to_complete_immediate(
        &mut self,
        status: CompletionStatus,
        clear_bit: u8,
        grab: bool,
    ) {
        if self.immediate_slot.is_none() {
            return;
        }

        if let Some(req) = self.immediate_slot.as_mut() {
            req.owners.clear(clear_bit);
            req.owners.clear(Owners::CANCEL);
        }

        if grab {
            self.grab_immediate_from_isr();
        }

        if self.timers.cancel(TimerId::ImmediateTotal) {
            if let Some(req) = self.immediate_slot.as_mut() {
                req.owners.clear(Owners::TOTAL_TIMER);
            }
        }

        let released = self
            .immediate_slot
            .as_ref()
            .is_some_and(|r| r.owners.is_empty());
        if released {
            if let Some(mut req) = self.immediate_slot.take() {
                if status == CompletionStatus::Success {
                    req.info = 1;
                }
                self.finish_request(req, status);
            }
        }
    }

    /// Deferred completion after the ISR emitted the immediate byte.
    pub(super) fn complete_immediate_from_isr(&mut self) {
        self.try_to_complete_immediate(CompletionStatus::Success, Owners::ISR, false);
    }

    /// The immediate character's deadline passed.
    pub(super) fn immediate_total_timeout(&mut self) {
        self.try_to_complete_immediate(
            CompletionStatus::Timeout,
            Owners::TOTAL_TIMER,
            true,
        );
    }

    /// Cancel path for a pending immediate character.
    pub(super) fn cancel_current_immediate(&mut self) {
        self.try_to_complete_immediate(CompletionStatus::Cancelled, Owners::CANCEL, true);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
