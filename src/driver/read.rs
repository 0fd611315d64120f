//! The read pipeline.
//!
//! A read drains greedily from the RX ring, completes synchronously when
//! its immediate-return rules allow, and otherwise donates its buffer to
//! the interrupt service: the ISR copies arriving bytes straight into the
//! request until it is satisfied, a timer expires, or a cancel revokes the
//! donation.
//!
//! Completion can race between four parties (ISR fill, total timer,
//! interval timer, cancel). Two mechanisms keep it single-shot: the
//! [`LastRead`] sentinel makes a stale interval-timer callback harmless,
//! and the owner bitset ensures that only the path clearing the final
//! reference actually completes the request.

use alloc::vec::Vec;

use super::port::{LastRead, Port, ReadTarget};
use super::request::{
    CompletionStatus, Owners, Request, RequestBody, RequestId,
};
use crate::driver::error::{IoError, Result};
use crate::hal::uart::UartDevice;
use crate::internal::timer::TimerId;
use crate::{Duration, Instant};

/// Interval expiry is detected by polling: the interval timer ticks at a
/// granularity finer than the interval and compares wall time against the
/// last reception. Short intervals get a fine tick, long ones a coarse
/// tick.
const SHORT_INTERVAL_TICK: Duration = Duration::from_millis(1);
const LONG_INTERVAL_TICK: Duration = Duration::from_millis(100);
const INTERVAL_CUTOVER: Duration = Duration::from_millis(1000);

fn interval_tick(interval: Duration) -> Duration {
    if interval >= INTERVAL_CUTOVER {
        LONG_INTERVAL_TICK
    } else {
        SHORT_INTERVAL_TICK
    }
}

/// Timeout behavior computed once at read start from the snapshot.
#[derive(Debug, Clone, Copy, Default)]
struct ReadPlan {
    return_with_whats_present: bool,
    /// Return-quickly semantics: complete as soon as anything was copied
    return_on_partial: bool,
    /// Truncate the wanted length to one byte when nothing is buffered
    crunch_to_one: bool,
    use_total: bool,
    use_interval: bool,
    total: Duration,
    interval: Duration,
}

impl<U: UartDevice> Port<U> {
    // =========================================================================
    // Submission
    // =========================================================================

    /// Submit a read of `len` bytes.
    ///
    /// The completion carries the bytes read. Whether and when it arrives
    /// is governed by the configured [`Timeouts`](crate::Timeouts) at
    /// submission time; later timeout changes do not affect it.
    ///
    /// # Errors
    /// - `InvalidState` - port not running
    /// - `OutOfMemory` - request buffer allocation failed
    pub fn read(&mut self, now: Instant, len: usize) -> Result<RequestId> {
        self.check_running()?;
        let id = self.alloc_id();

        if len == 0 {
            // Nothing to transfer; complete in submission order anyway.
            let req = Request::new(
                id,
                RequestBody::Read {
                    buf: Vec::new(),
                    target_len: 0,
                },
            );
            self.finish_request(req, CompletionStatus::Success);
            return Ok(id);
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| IoError::OutOfMemory)?;
        buf.resize(len, 0);

        let req = Request::new(
            id,
            RequestBody::Read {
                buf,
                target_len: len,
            },
        );

        if self.read_slot.enqueue_or_start(req) {
            self.start_current_read(now);
        }
        Ok(id)
    }

    /// Grow the RX ring to `new_capacity` bytes.
    ///
    /// Runs in read-queue order so it cannot shear an in-flight read.
    /// Capacities at or below the current one complete immediately as a
    /// no-op; the ring only ever grows.
    ///
    /// # Errors
    /// - `InvalidState` - port not running
    pub fn set_queue_size(&mut self, now: Instant, new_capacity: usize) -> Result<RequestId> {
        self.check_running()?;
        let id = self.alloc_id();

        if new_capacity <= self.ring.capacity() {
            let req = Request::new(id, RequestBody::Resize { new_capacity });
            self.finish_request(req, CompletionStatus::Success);
            return Ok(id);
        }

        let req = Request::new(id, RequestBody::Resize { new_capacity });
        if self.read_slot.enqueue_or_start(req) {
            self.start_current_read(now);
        }
        Ok(id)
    }

    // =========================================================================
    // Start
    // =========================================================================

    /// Start whatever is current on the read queue, looping while requests
    /// complete synchronously.
    pub(super) fn start_current_read(&mut self, now: Instant) {
        if self.state == super::config::State::Gone {
            return;
        }
        loop {
            let Some(current) = self.read_slot.current.as_ref() else {
                return;
            };

            // Resizes ride the read queue; handle and move on.
            if let RequestBody::Resize { new_capacity } = current.body {
                let status = match self.execute_resize(new_capacity) {
                    Ok(()) => CompletionStatus::Success,
                    Err(_) => CompletionStatus::InsufficientResources,
                };
                let (done, more) = self.read_slot.finish_current();
                if let Some(req) = done {
                    self.finish_request(req, status);
                }
                if more {
                    continue;
                }
                return;
            }

            // Stale timers from the previous read must not fire into this
            // one.
            self.timers.cancel(TimerId::ReadTotal);
            self.timers.cancel(TimerId::ReadInterval);

            let target_len = match &current.body {
                RequestBody::Read { target_len, .. } => *target_len,
                _ => return,
            };
            self.needed_for_read = target_len;

            let plan = self.plan_read(target_len);

            let copied = self.drain_ring_into_current();
            if copied > 0 {
                self.handle_reduced_ring();
            }

            let info = self
                .read_slot
                .current
                .as_ref()
                .map_or(0, |r| r.info);

            if plan.return_with_whats_present
                || self.needed_for_read == 0
                || (plan.return_on_partial && info > 0)
            {
                let (done, more) = self.read_slot.finish_current();
                if let Some(req) = done {
                    self.finish_request(req, CompletionStatus::Success);
                }
                if more {
                    continue;
                }
                return;
            }

            self.pend_current_read(now, plan, info);
            return;
        }
    }

    /// Classify the snapshot timeouts into a start plan.
    fn plan_read(&self, len: usize) -> ReadPlan {
        let t = self.config.timeouts;
        let mut plan = ReadPlan::default();
        let mut multiplier = 0u64;
        let mut constant = 0u64;

        if t.read_interval != 0 && t.read_interval != u32::MAX {
            plan.use_interval = true;
            plan.interval = Duration::from_millis(u64::from(t.read_interval));
        }

        let totals_zero = t.read_total_constant == 0 && t.read_total_multiplier == 0;

        if t.read_interval == u32::MAX {
            // Return-quickly family: anything buffered comes back at
            // once. With finite totals the read then waits - bounded -
            // for just its first byte.
            if totals_zero {
                plan.return_with_whats_present = true;
            } else if t.read_total_constant != u32::MAX {
                plan.use_total = true;
                plan.return_on_partial = true;
                plan.crunch_to_one = true;
                constant = u64::from(t.read_total_constant);
                if t.read_total_multiplier != u32::MAX {
                    multiplier = u64::from(t.read_total_multiplier);
                }
            }
        } else if t.read_interval == 0 && totals_zero {
            // Nothing armed at all: hand back what is present rather than
            // parking the request forever.
            plan.return_with_whats_present = true;
        } else if !totals_zero {
            plan.use_total = true;
            multiplier = u64::from(t.read_total_multiplier);
            constant = u64::from(t.read_total_constant);
        }

        if plan.use_total {
            plan.total = Duration::from_millis(len as u64 * multiplier + constant);
        }
        plan
    }

    /// Copy buffered bytes into the current read request.
    fn drain_ring_into_current(&mut self) -> usize {
        let needed = self.needed_for_read;
        if needed == 0 {
            return 0;
        }
        let Some(req) = self.read_slot.current.as_mut() else {
            return 0;
        };
        let RequestBody::Read {
            buf, target_len, ..
        } = &mut req.body
        else {
            return 0;
        };

        let start = *target_len - needed;
        let n = self.ring.drain_into(&mut buf[start..*target_len]);
        self.needed_for_read -= n;
        req.info += n;
        n
    }

    /// Hand the unsatisfied read to the interrupt service and arm its
    /// timers.
    fn pend_current_read(&mut self, now: Instant, plan: ReadPlan, info: usize) {
        if plan.crunch_to_one {
            // Nothing was buffered (or we would have completed above), so
            // shrinking the target to a single byte is safe.
            if let Some(req) = self.read_slot.current.as_mut() {
                if let RequestBody::Read { target_len, .. } = &mut req.body {
                    *target_len = 1;
                }
            }
            self.needed_for_read = 1;
        }

        // Interval timing effectively starts at the first byte; a non-zero
        // count here means bytes were already copied at start.
        self.last_read = LastRead::Counted(info);
        self.read_by_isr = 0;
        self.read_target = ReadTarget::User;

        if let Some(req) = self.read_slot.current.as_mut() {
            req.owners.set(Owners::ISR);
            req.owners.set(Owners::CANCEL);
            if plan.use_total {
                req.owners.set(Owners::TOTAL_TIMER);
            }
            if plan.use_interval {
                req.owners.set(Owners::INTERVAL_TIMER);
            }
        }

        if plan.use_total {
            self.timers.arm(TimerId::ReadTotal, now.plus(plan.total));
        }
        if plan.use_interval {
            self.read_interval_snapshot = plan.interval;
            self.last_read_time = now;
            self.timers
                .arm(TimerId::ReadInterval, now.plus(interval_tick(plan.interval)));
        }
    }

    // =========================================================================
    // Completion Protocol
    // =========================================================================

    /// Revoke interrupt-service ownership of the current read, computing
    /// the transfer count from the donation cursors. No-op when the ISR
    /// already handed the buffer back.
    pub(super) fn grab_read_from_isr(&mut self) {
        if self.read_target != ReadTarget::User {
            return;
        }
        if let Some(req) = self.read_slot.current.as_mut() {
            if let RequestBody::Read { target_len, .. } = &req.body {
                req.info = *target_len - self.needed_for_read;
            }
            req.owners.clear(Owners::ISR);
        }
        self.read_target = ReadTarget::Ring;
        self.needed_for_read = 0;
    }

    /// One step of the shared completion protocol: release `clear_bit`
    /// (and the cancel reference), optionally revoke the ISR, cancel the
    /// read timers, and complete with `status` only if that emptied the
    /// owner set.
    pub(super) fn try_to_complete_read(
        &mut self,
        now: Instant,
        status: CompletionStatus,
        clear_bit: u8,
        grab: bool,
    ) {
        if self.read_slot.current.is_none() {
            return;
        }

        if let Some(req) = self.read_slot.current.as_mut() {
            req.owners.clear(clear_bit);
            req.owners.clear(Owners::CANCEL);
        }

        if grab {
            self.grab_read_from_isr();
        }

        if self.timers.cancel(TimerId::ReadTotal) {
            if let Some(req) = self.read_slot.current.as_mut() {
                req.owners.clear(Owners::TOTAL_TIMER);
            }
        }
        if self.timers.cancel(TimerId::ReadInterval) {
            if let Some(req) = self.read_slot.current.as_mut() {
                req.owners.clear(Owners::INTERVAL_TIMER);
            }
        }

        let released = self
            .read_slot
            .current
            .as_ref()
            .is_some_and(|r| r.owners.is_empty());
        if !released {
            // Someone still holds a reference; their release will complete
            // the request with their status.
            return;
        }

        let (done, more) = self.read_slot.finish_current();
        if let Some(req) = done {
            self.finish_request(req, status);
        }
        if more {
            self.start_current_read(now);
        }
    }

    /// Deferred completion after the ISR filled the donated buffer.
    pub(super) fn complete_read_from_isr(&mut self, now: Instant) {
        self.try_to_complete_read(now, CompletionStatus::Success, Owners::ISR, false);
    }

    /// Cancel path for the current read.
    pub(super) fn cancel_current_read(&mut self, now: Instant) {
        self.last_read = LastRead::Cancel;
        self.try_to_complete_read(now, CompletionStatus::Cancelled, Owners::CANCEL, true);
    }

    /// Abort path for the current read (line errors, hardware loss).
    pub(super) fn abort_current_read(&mut self, now: Instant, status: CompletionStatus) {
        self.last_read = LastRead::Cancel;
        self.try_to_complete_read(now, status, Owners::CANCEL, true);
    }

    // =========================================================================
    // Timeouts
    // =========================================================================

    /// The read's total deadline passed.
    pub(super) fn read_total_timeout(&mut self, now: Instant) {
        self.last_read = LastRead::Total;
        self.try_to_complete_read(
            now,
            CompletionStatus::Timeout,
            Owners::TOTAL_TIMER,
            true,
        );
    }

    /// The inter-byte interval elapsed - or another path finished first
    /// and this callback is draining behind it.
    pub(super) fn read_interval_timeout(&mut self, now: Instant) {
        match self.last_read {
            LastRead::Total => {
                self.try_to_complete_read(
                    now,
                    CompletionStatus::Timeout,
                    Owners::INTERVAL_TIMER,
                    true,
                );
            }
            LastRead::Complete => {
                self.try_to_complete_read(
                    now,
                    CompletionStatus::Success,
                    Owners::INTERVAL_TIMER,
                    true,
                );
            }
            LastRead::Cancel => {
                self.try_to_complete_read(
                    now,
                    CompletionStatus::Cancelled,
                    Owners::INTERVAL_TIMER,
                    true,
                );
            }
            LastRead::Counted(count) => {
                let tick = interval_tick(self.read_interval_snapshot);
                if self.read_by_isr > 0 {
                    // Bytes arrived since the last tick: restart the
                    // window from now.
                    self.last_read = LastRead::Counted(self.read_by_isr);
                    self.read_by_isr = 0;
                    self.last_read_time = now;
                    self.timers.arm(TimerId::ReadInterval, now.plus(tick));
                } else if count > 0 {
                    // The window only runs once the first byte has been
                    // seen.
                    if now.since(self.last_read_time) >= self.read_interval_snapshot {
                        self.try_to_complete_read(
                            now,
                            CompletionStatus::Timeout,
                            Owners::INTERVAL_TIMER,
                            true,
                        );
                    } else {
                        self.timers.arm(TimerId::ReadInterval, now.plus(tick));
                    }
                } else {
                    self.timers.arm(TimerId::ReadInterval, now.plus(tick));
                }
            }
        }
    }

    // =========================================================================
    // Resize
    // =========================================================================

    /// Swap in a larger ring and re-derive the thresholds that scale with
    /// it.
    fn execute_resize(&mut self, new_capacity: usize) -> crate::driver::error::IoResult<()> {
        self.ring.grow(new_capacity)?;
        self.nearly_full = new_capacity * 4 / 5;
        self.config.handflow.xoff_limit = new_capacity / 8;
        self.config.handflow.xon_limit = new_capacity / 2;

        #[cfg(feature = "defmt")]
        defmt::debug!("rx ring resized to {} bytes", new_capacity);

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    extern crate std;

    use super::super::config::Timeouts;
    use super::super::request::CompletionStatus;
    use crate::testing::Bench;
    use crate::PortConfig;

    fn bench_with_timeouts(timeouts: Timeouts) -> Bench {
        Bench::new(PortConfig::new().with_ring_capacity(256).with_timeouts(timeouts))
    }

    #[test]
    fn return_with_whats_present_returns_empty() {
        // interval = MAX, totals zero: give back whatever is there, even
        // nothing, without waiting.
        let mut bench = bench_with_timeouts(Timeouts {
            read_interval: u32::MAX,
            ..Timeouts::default()
        });

        let id = bench.port.read(bench.now, 10).unwrap();
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(done.bytes_transferred, 0);
    }

    #[test]
    fn return_with_whats_present_returns_partial() {
        let mut bench = bench_with_timeouts(Timeouts {
            read_interval: u32::MAX,
            ..Timeouts::default()
        });

        bench.inject(b"abc");
        let id = bench.port.read(bench.now, 10).unwrap();
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(done.data.as_deref(), Some(&b"abc"[..]));
    }

    #[test]
    fn all_zero_timeouts_never_block() {
        // interval and totals all zero arm nothing, so the read returns
        // whatever is buffered instead of parking forever.
        let mut bench = bench_with_timeouts(Timeouts::default());

        let id = bench.port.read(bench.now, 10).unwrap();
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(done.bytes_transferred, 0);

        bench.inject(b"later");
        let id = bench.port.read(bench.now, 10).unwrap();
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.data.as_deref(), Some(&b"later"[..]));
    }

    #[test]
    fn return_quickly_takes_buffered_bytes_over_waiting() {
        // interval = MAX with finite totals: immediate when anything is
        // buffered.
        let mut bench = bench_with_timeouts(Timeouts {
            read_interval: u32::MAX,
            read_total_constant: 500,
            ..Timeouts::default()
        });

        bench.inject(b"xy");
        let id = bench.port.read(bench.now, 10).unwrap();
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(done.bytes_transferred, 2);
    }

    #[test]
    fn return_quickly_waits_bounded_when_empty() {
        let mut bench = bench_with_timeouts(Timeouts {
            read_interval: u32::MAX,
            read_total_constant: 100,
            ..Timeouts::default()
        });

        let id = bench.port.read(bench.now, 10).unwrap();
        bench.pump();
        assert!(bench.completion().is_none());

        bench.advance(100);
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Timeout);
        assert_eq!(done.bytes_transferred, 0);
    }

    #[test]
    fn first_byte_finishes_crunched_read() {
        // interval = MAX, multiplier = MAX: the read shrinks to one byte
        // once it has to wait.
        let mut bench = bench_with_timeouts(Timeouts {
            read_interval: u32::MAX,
            read_total_multiplier: u32::MAX,
            read_total_constant: 500,
            ..Timeouts::default()
        });

        let id = bench.port.read(bench.now, 100).unwrap();
        bench.pump();
        assert!(bench.completion().is_none());

        bench.advance(20);
        bench.inject(b"Z");

        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(done.bytes_transferred, 1);
        assert_eq!(done.data.as_deref(), Some(&b"Z"[..]));
    }

    #[test]
    fn interval_does_not_start_before_first_byte() {
        let mut bench = bench_with_timeouts(Timeouts {
            read_interval: 50,
            ..Timeouts::default()
        });

        let id = bench.port.read(bench.now, 4).unwrap();
        bench.pump();

        // Far more than the interval with no bytes at all: still pending.
        bench.advance(300);
        assert!(bench.completion().is_none());

        bench.inject(b"k");
        bench.advance(70);
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Timeout);
        assert_eq!(done.bytes_transferred, 1);
    }

    #[test]
    fn interval_restarts_on_each_byte() {
        let mut bench = bench_with_timeouts(Timeouts {
            read_interval: 50,
            ..Timeouts::default()
        });

        let id = bench.port.read(bench.now, 10).unwrap();
        bench.pump();

        for _ in 0..5 {
            bench.inject(b".");
            bench.advance(30); // always inside the window
        }
        assert!(bench.completion().is_none());

        bench.advance(60);
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Timeout);
        assert_eq!(done.bytes_transferred, 5);
    }

    #[test]
    fn satisfied_read_completes_success_before_total() {
        let mut bench = bench_with_timeouts(Timeouts {
            read_total_constant: 1000,
            ..Timeouts::default()
        });

        let id = bench.port.read(bench.now, 4).unwrap();
        bench.pump();
        bench.inject(b"full");

        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(done.data.as_deref(), Some(&b"full"[..]));

        // The total timer was cancelled with the completion.
        bench.advance(2000);
        assert!(bench.completion().is_none());
    }

    #[test]
    fn queued_reads_run_fifo() {
        let mut bench = bench_with_timeouts(Timeouts {
            read_total_constant: 1000,
            ..Timeouts::default()
        });

        let r1 = bench.port.read(bench.now, 2).unwrap();
        let r2 = bench.port.read(bench.now, 2).unwrap();
        bench.pump();

        bench.inject(b"abcd");

        let d1 = bench.port.take_completion_of(r1).unwrap();
        assert_eq!(d1.data.as_deref(), Some(&b"ab"[..]));
        let d2 = bench.port.take_completion_of(r2).unwrap();
        assert_eq!(d2.data.as_deref(), Some(&b"cd"[..]));
    }

    #[test]
    fn resize_preserves_buffered_bytes() {
        let mut bench = Bench::new(PortConfig::new().with_ring_capacity(64).with_timeouts(
            Timeouts {
                read_interval: u32::MAX,
                ..Timeouts::default()
            },
        ));

        bench.inject(b"keep me around");
        let resize = bench.port.set_queue_size(bench.now, 256).unwrap();
        bench.pump();
        let done = bench.port.take_completion_of(resize).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(bench.port.properties().rx_queue_size, 256);

        let id = bench.port.read(bench.now, 32).unwrap();
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.data.as_deref(), Some(&b"keep me around"[..]));
    }

    #[test]
    fn resize_rederives_flow_limits() {
        let mut bench = Bench::new(PortConfig::new().with_ring_capacity(64));
        bench.port.set_queue_size(bench.now, 1024).unwrap();
        bench.pump();

        let handflow = *bench.port.handflow();
        assert_eq!(handflow.xoff_limit, 128);
        assert_eq!(handflow.xon_limit, 512);
    }

    #[test]
    fn resize_shrink_is_a_noop() {
        let mut bench = Bench::new(PortConfig::new().with_ring_capacity(256));
        let id = bench.port.set_queue_size(bench.now, 64).unwrap();
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(bench.port.properties().rx_queue_size, 256);
    }

    #[test]
    fn resize_waits_behind_pending_read() {
        let mut bench = bench_with_timeouts(Timeouts {
            read_total_constant: 60_000,
            ..Timeouts::default()
        });

        let read = bench.port.read(bench.now, 4).unwrap();
        let resize = bench.port.set_queue_size(bench.now, 512).unwrap();
        bench.pump();

        // The read blocks indefinitely, so the resize has not run.
        assert_eq!(bench.port.properties().rx_queue_size, 256);

        bench.port.cancel(bench.now, read).unwrap();
        bench.pump();

        assert!(bench.port.take_completion_of(read).is_some());
        let done = bench.port.take_completion_of(resize).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(bench.port.properties().rx_queue_size, 512);
    }
}
