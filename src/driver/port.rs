//! Core serial port implementation.
//!
//! This module contains the main [`Port`] structure and core operations:
//!
//! - Initialization and line programming
//! - The control plane (baud, line control, characters, timeouts,
//!   modem lines, status, statistics)
//! - Request identity, cancellation, and purge
//! - The deferred-work pump ([`Port::poll`]) and completion delivery
//!
//! The read pipeline lives in [`read`](super::read), the write pipeline in
//! [`write`](super::write), flow control in [`flow`](super::flow),
//! interrupt service in [`isr`](super::isr), and event waits in
//! [`wait`](super::wait).

use alloc::collections::VecDeque;

use super::config::{
    CommProperties, CommStatus, PortConfig, State, Stats, StopBits, WordLength,
};
use super::error::{ConfigError, Error, IoError, QueueError, Result};
use super::request::{
    Completion, CompletionStatus, Request, RequestId, RequestSlot,
};
use crate::hal::uart::{UartDevice, UartRegister, fcr, ier, lcr, mcr};
use crate::internal::ring::RingBuffer;
use crate::internal::timer::{Duration, Instant, TimerId, TimerSet};

// =============================================================================
// Purge Selector Bits
// =============================================================================

/// Selector bits for [`Port::purge`]
pub mod purge {
    /// Cancel the current and queued writes (and any xoff counter)
    pub const TX_ABORT: u32 = 0x01;
    /// Cancel the current and queued reads
    pub const RX_ABORT: u32 = 0x02;
    /// Clear the hardware transmit FIFO
    pub const TX_CLEAR: u32 = 0x04;
    /// Drop everything buffered in the RX ring and hardware FIFO
    pub const RX_CLEAR: u32 = 0x08;

    pub(super) const ALL: u32 = TX_ABORT | RX_ABORT | TX_CLEAR | RX_CLEAR;
}

// =============================================================================
// Internal State Tags
// =============================================================================

/// Where the interrupt service deposits received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ReadTarget {
    /// Into the RX ring
    Ring,
    /// Into the current read's donated buffer
    User,
}

/// Sentinel recording which path ended the current read first, so a
/// lurking interval-timer callback turns into that path's completion
/// instead of a second one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LastRead {
    /// Bytes observed at the last interval expiry (or at donation)
    Counted(usize),
    /// The ISR filled the buffer
    Complete,
    /// The total timer fired
    Total,
    /// A cancel arrived
    Cancel,
}

/// Deferred work scheduled by the interrupt service (and by dispatch paths
/// that must not run long work inline). Drained FIFO by [`Port::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Dpc {
    ReadComplete,
    WriteComplete,
    ImmediateComplete,
    XoffDone,
    WaitComplete,
    CommError,
    StartTimerLowerRts,
    HardwareGone,
}

// =============================================================================
// Port
// =============================================================================

/// One serial port: configuration, request queues, flow state, and the
/// device handle.
///
/// # Type Parameters
/// * `U` - the UART register access implementation
///
/// # Example
/// ```ignore
/// let mut port = Port::new(PortIo { base: 0x3F8 });
/// port.init(PortConfig::new().with_baud(115_200))?;
///
/// let id = port.write(now, b"hello")?;
/// // ... platform pumps handle_interrupt() / poll(now) ...
/// while let Some(completion) = port.take_completion() {
///     assert_eq!(completion.id, id);
/// }
/// ```
///
/// # Concurrency
///
/// `Port` itself is single-threaded. Wrap it in
/// [`SharedPort`](crate::sync::SharedPort) to share it between thread
/// context and the interrupt handler; every entry point then runs inside
/// a critical section, which is the mutual exclusion the request/ISR
/// handoff protocol is specified against.
pub struct Port<U: UartDevice> {
    pub(super) dev: U,
    pub(super) config: PortConfig,
    pub(super) state: State,
    pub(super) ring: RingBuffer,
    pub(super) timers: TimerSet,

    // Request plumbing
    pub(super) read_slot: RequestSlot,
    pub(super) write_slot: RequestSlot,
    pub(super) xoff_slot: Option<Request>,
    pub(super) wait_slot: Option<Request>,
    pub(super) immediate_slot: Option<Request>,
    pub(super) completions: VecDeque<Completion>,
    pub(super) deferred: VecDeque<Dpc>,
    pub(super) next_id: u64,
    pub(super) total_chars_queued: usize,

    // Read pipeline
    pub(super) read_target: ReadTarget,
    pub(super) needed_for_read: usize,
    pub(super) read_by_isr: usize,
    pub(super) last_read: LastRead,
    pub(super) last_read_time: Instant,
    pub(super) read_interval_snapshot: Duration,
    pub(super) nearly_full: usize,

    // Write pipeline
    pub(super) write_remaining: usize,
    pub(super) transmit_immediate: bool,
    pub(super) immediate_byte: u8,
    pub(super) emptied_transmit: bool,
    pub(super) holding_empty: bool,

    // Xoff counter
    pub(super) count_since_xoff: u32,

    // Flow state
    pub(super) tx_holding: u8,
    pub(super) rx_holding: u8,
    pub(super) send_xon: bool,
    pub(super) send_xoff: bool,
    pub(super) rts_lower_count: u32,
    pub(super) handflow_installed: bool,

    // Events and errors
    pub(super) isr_wait_mask: u32,
    pub(super) history_mask: u32,
    pub(super) wait_published: bool,
    pub(super) error_word: u32,
    pub(super) escape_char: u8,
    pub(super) eof_received: bool,
    pub(super) stats: Stats,

    // Hardware vanish detection
    pub(super) dead_iir_passes: u8,
}

impl<U: UartDevice> Port<U> {
    /// Create a port around a device. The port does not touch the
    /// hardware until [`init`](Self::init).
    pub fn new(dev: U) -> Self {
        Self {
            dev,
            config: PortConfig::new(),
            state: State::Uninitialized,
            ring: RingBuffer::empty(),
            timers: TimerSet::new(),
            read_slot: RequestSlot::new(),
            write_slot: RequestSlot::new(),
            xoff_slot: None,
            wait_slot: None,
            immediate_slot: None,
            completions: VecDeque::new(),
            deferred: VecDeque::new(),
            next_id: 0,
            total_chars_queued: 0,
            read_target: ReadTarget::Ring,
            needed_for_read: 0,
            read_by_isr: 0,
            last_read: LastRead::Counted(0),
            last_read_time: Instant::ZERO,
            read_interval_snapshot: Duration::ZERO,
            nearly_full: 0,
            write_remaining: 0,
            transmit_immediate: false,
            immediate_byte: 0,
            emptied_transmit: false,
            holding_empty: false,
            count_since_xoff: 0,
            tx_holding: 0,
            rx_holding: 0,
            send_xon: false,
            send_xoff: false,
            rts_lower_count: 0,
            handflow_installed: false,
            isr_wait_mask: 0,
            history_mask: 0,
            wait_published: false,
            error_word: 0,
            escape_char: 0,
            eof_received: false,
            stats: Stats::default(),
            dead_iir_passes: 0,
        }
    }

    // =========================================================================
    // State Accessors
    // =========================================================================

    /// Get the current state
    #[inline(always)]
    pub fn state(&self) -> State {
        self.state
    }

    /// Get the active configuration
    #[inline(always)]
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Borrow the underlying device.
    ///
    /// Bypassing the engine's register discipline is on the caller; most
    /// users never need this.
    #[inline(always)]
    pub fn device(&self) -> &U {
        &self.dev
    }

    /// Mutably borrow the underlying device; same caveat as
    /// [`device`](Self::device).
    #[inline(always)]
    pub fn device_mut(&mut self) -> &mut U {
        &mut self.dev
    }

    pub(super) fn check_running(&self) -> Result<()> {
        match self.state {
            State::Running => Ok(()),
            State::Gone => Err(IoError::DeviceGone.into()),
            State::Uninitialized => Err(ConfigError::InvalidState.into()),
        }
    }

    pub(super) fn alloc_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }

    /// Deliver a terminal for `req` onto the completion queue.
    pub(super) fn finish_request(&mut self, req: Request, status: CompletionStatus) {
        #[cfg(feature = "defmt")]
        defmt::trace!("request complete: {}", status);

        self.completions.push_back(req.into_completion(status));
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Initialize the port: allocate the ring, program the line, FIFOs,
    /// and modem lines, and enable interrupts.
    ///
    /// # Errors
    /// - `AlreadyInitialized` - the port is already running
    /// - `InvalidBaud` / `InvalidLineControl` / `InvalidHandshake` -
    ///   rejected configuration
    /// - `OutOfMemory` - ring allocation failed
    pub fn init(&mut self, config: PortConfig) -> Result<()> {
        if self.state != State::Uninitialized {
            return Err(ConfigError::AlreadyInitialized.into());
        }

        Self::validate_line(config.line.word_length, config.line.stop_bits)?;
        let divisor = Self::divisor_for(config.clock_hz, config.line.baud)?;

        let mut config = config;
        config.handflow.derive_limits(config.ring_capacity);
        if config.handflow.xoff_limit > config.ring_capacity
            || config.handflow.xon_limit > config.ring_capacity
        {
            return Err(ConfigError::InvalidHandshake.into());
        }

        self.ring = RingBuffer::new(config.ring_capacity)?;
        self.nearly_full = config.ring_capacity * 4 / 5;
        self.config = config;

        // Program the hardware: FIFOs, divisor, framing.
        if self.config.fifo.enabled {
            self.dev.write(
                UartRegister::FifoControl,
                fcr::ENABLE
                    | fcr::CLEAR_RX
                    | fcr::CLEAR_TX
                    | self.config.fifo.rx_trigger.to_fcr(),
            );
        } else {
            self.dev.write(UartRegister::FifoControl, 0);
        }

        self.program_divisor(divisor);
        self.program_line_control();

        // OUT2 gates the interrupt line on PC-style wiring.
        self.dev.write(UartRegister::ModemControl, mcr::OUT2);

        // Prime the status shadows and clear stale latches.
        self.state = State::Running;
        self.process_lsr();
        self.handflow_installed = false;
        let handflow = self.config.handflow;
        self.setup_new_handflow(handflow);
        self.handle_modem_update(false);

        self.dev.write(UartRegister::InterruptEnable, ier::ALL);

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "port running: {} baud, ring {} bytes",
            self.config.line.baud,
            self.config.ring_capacity
        );

        Ok(())
    }

    fn validate_line(word_length: WordLength, stop_bits: StopBits) -> Result<()> {
        // The hardware only produces 1.5 stop bits with 5-bit words.
        if stop_bits == StopBits::OneAndHalf && word_length != WordLength::Five {
            return Err(ConfigError::InvalidLineControl.into());
        }
        Ok(())
    }

    fn divisor_for(clock_hz: u32, baud: u32) -> Result<u16> {
        if baud == 0 {
            return Err(ConfigError::InvalidBaud.into());
        }
        let divisor = clock_hz / (16 * baud);
        if divisor == 0 || divisor > u32::from(u16::MAX) {
            return Err(ConfigError::InvalidBaud.into());
        }
        Ok(divisor as u16)
    }

    fn program_divisor(&mut self, divisor: u16) {
        let lc = self.dev.read(UartRegister::LineControl);
        self.dev.write(UartRegister::LineControl, lc | lcr::DLAB);
        self.dev
            .write(UartRegister::DivisorLo, (divisor & 0xFF) as u8);
        self.dev
            .write(UartRegister::DivisorHi, (divisor >> 8) as u8);
        self.dev.write(UartRegister::LineControl, lc & !lcr::DLAB);
    }

    fn program_line_control(&mut self) {
        let line = self.config.line;
        let mut value = line.word_length.to_lcr();

        if line.stop_bits != StopBits::One {
            value |= lcr::STOP_EXTRA;
        }
        value |= match line.parity {
            super::config::Parity::None => 0,
            super::config::Parity::Odd => lcr::PARITY_ENABLE,
            super::config::Parity::Even => lcr::PARITY_ENABLE | lcr::PARITY_EVEN,
            super::config::Parity::Mark => lcr::PARITY_ENABLE | lcr::PARITY_STICK,
            super::config::Parity::Space => {
                lcr::PARITY_ENABLE | lcr::PARITY_EVEN | lcr::PARITY_STICK
            }
        };

        // Preserve an active break.
        let old = self.dev.read(UartRegister::LineControl);
        self.dev
            .write(UartRegister::LineControl, value | (old & lcr::BREAK));
    }

    // =========================================================================
    // Control Plane: Line Parameters
    // =========================================================================

    /// Get the configured baud rate
    #[inline(always)]
    pub fn baud(&self) -> u32 {
        self.config.line.baud
    }

    /// Reprogram the baud rate.
    ///
    /// # Errors
    /// - `InvalidBaud` - no representable divisor for this clock
    pub fn set_baud(&mut self, baud: u32) -> Result<()> {
        self.check_running()?;
        let divisor = Self::divisor_for(self.config.clock_hz, baud)?;
        self.program_divisor(divisor);
        self.config.line.baud = baud;
        Ok(())
    }

    /// Get the configured framing
    pub fn line_control(&self) -> (WordLength, StopBits, super::config::Parity) {
        let line = self.config.line;
        (line.word_length, line.stop_bits, line.parity)
    }

    /// Reprogram word length, stop bits, and parity.
    ///
    /// The valid-data mask follows the word length: sub-8-bit words mask
    /// the received high bits.
    ///
    /// # Errors
    /// - `InvalidLineControl` - unsupported combination
    pub fn set_line_control(
        &mut self,
        word_length: WordLength,
        stop_bits: StopBits,
        parity: super::config::Parity,
    ) -> Result<()> {
        self.check_running()?;
        Self::validate_line(word_length, stop_bits)?;

        self.config.line.word_length = word_length;
        self.config.line.stop_bits = stop_bits;
        self.config.line.parity = parity;
        self.program_line_control();
        Ok(())
    }

    /// Get the special characters
    #[inline(always)]
    pub fn chars(&self) -> &super::config::SpecialChars {
        &self.config.chars
    }

    /// Replace the special characters.
    ///
    /// # Errors
    /// - `InvalidCharacters` - a character collides with the enabled
    ///   escape character
    pub fn set_chars(&mut self, chars: super::config::SpecialChars) -> Result<()> {
        self.check_running()?;
        if self.escape_char != 0 {
            let all = [
                chars.xon,
                chars.xoff,
                chars.error,
                chars.eof,
                chars.event,
                chars.break_char,
            ];
            if all.contains(&self.escape_char) {
                return Err(ConfigError::InvalidCharacters.into());
            }
        }
        self.config.chars = chars;
        Ok(())
    }

    /// Get the timeouts
    #[inline(always)]
    pub fn timeouts(&self) -> &super::config::Timeouts {
        &self.config.timeouts
    }

    /// Replace the timeouts. In-flight requests keep the values they
    /// snapshot at start.
    pub fn set_timeouts(&mut self, timeouts: super::config::Timeouts) -> Result<()> {
        self.check_running()?;
        self.config.timeouts = timeouts;
        Ok(())
    }

    /// Enable (non-zero) or disable (zero) escape-triple insertion of
    /// line and modem status changes into the RX stream.
    ///
    /// # Errors
    /// - `InvalidCharacters` - the escape character collides with a
    ///   special character
    pub fn lsrmst_insert(&mut self, escape_char: u8) -> Result<()> {
        self.check_running()?;
        if escape_char != 0 {
            let chars = self.config.chars;
            let all = [
                chars.xon,
                chars.xoff,
                chars.error,
                chars.eof,
                chars.event,
                chars.break_char,
            ];
            if all.contains(&escape_char) {
                return Err(ConfigError::InvalidCharacters.into());
            }
        }
        self.escape_char = escape_char;
        Ok(())
    }

    // =========================================================================
    // Control Plane: Status Queries
    // =========================================================================

    /// Read the modem status register, with the same delta processing the
    /// interrupt path performs.
    pub fn modem_status(&mut self) -> Result<u8> {
        self.check_running()?;
        Ok(self.read_modem_status_synchronized())
    }

    /// Raw modem control register (DTR/RTS/OUT bits).
    pub fn modem_control(&mut self) -> Result<u8> {
        self.check_running()?;
        Ok(self.dev.read(UartRegister::ModemControl))
    }

    /// Current DTR/RTS levels as `(dtr, rts)`.
    pub fn dtr_rts(&mut self) -> Result<(bool, bool)> {
        let mc = self.modem_control()?;
        Ok((mc & mcr::DTR != 0, mc & mcr::RTS != 0))
    }

    /// Snapshot the transfer state. Reading clears the accumulated error
    /// word.
    pub fn comm_status(&mut self) -> CommStatus {
        let errors = self.error_word;
        self.error_word = 0;

        let current_write_progress = self
            .write_slot
            .current
            .as_ref()
            .map_or(0, |req| match &req.body {
                super::request::RequestBody::Write { data } => {
                    data.len() - self.write_remaining
                }
                _ => 0,
            });

        CommStatus {
            errors,
            tx_holds: self.tx_holding,
            rx_holds: self.rx_holding,
            in_queue: self.ring.count(),
            out_queue: self.total_chars_queued - current_write_progress,
            eof_received: self.eof_received,
            wait_for_immediate: self.transmit_immediate,
        }
    }

    /// Static capabilities of this port.
    pub fn properties(&self) -> CommProperties {
        CommProperties {
            max_baud: self.config.clock_hz / 16,
            rx_queue_size: self.ring.capacity(),
            rx_fifo_depth: 16,
            tx_fifo_depth: self.config.fifo.tx_fifo_depth,
            supports_dtr_dsr: true,
            supports_rts_cts: true,
            supports_xon_xoff: true,
            supports_wait_mask: true,
            supports_timeouts: true,
        }
    }

    /// Transfer statistics since the last [`clear_stats`](Self::clear_stats).
    #[inline(always)]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Zero the transfer statistics.
    pub fn clear_stats(&mut self) {
        self.stats = Stats::default();
    }

    // =========================================================================
    // Cancellation & Purge
    // =========================================================================

    /// Cancel a request by id, wherever it is queued.
    ///
    /// A current request goes through its kind's cancel routine (revoking
    /// interrupt-service ownership first); a queued one completes
    /// `Cancelled` directly.
    ///
    /// # Errors
    /// - `UnknownRequest` - no such request is pending
    pub fn cancel(&mut self, now: Instant, id: RequestId) -> Result<()> {
        if self.read_slot.is_current(id) {
            self.cancel_current_read(now);
            return Ok(());
        }
        if let Some(req) = self.read_slot.remove_queued(id) {
            self.finish_request(req, CompletionStatus::Cancelled);
            return Ok(());
        }

        if self.write_slot.is_current(id) {
            self.cancel_current_write(now);
            return Ok(());
        }
        if let Some(req) = self.write_slot.remove_queued(id) {
            self.release_queued_write(&req);
            self.finish_request(req, CompletionStatus::Cancelled);
            return Ok(());
        }

        if self.xoff_slot.as_ref().is_some_and(|r| r.id == id) {
            self.cancel_current_xoff();
            return Ok(());
        }
        if self.immediate_slot.as_ref().is_some_and(|r| r.id == id) {
            self.cancel_current_immediate();
            return Ok(());
        }
        if self.wait_slot.as_ref().is_some_and(|r| r.id == id) {
            self.cancel_wait();
            return Ok(());
        }

        Err(Error::Queue(QueueError::UnknownRequest))
    }

    /// Cancel and clear per the [`purge`] selector bits.
    ///
    /// # Errors
    /// - `InvalidLength` - unknown selector bits
    pub fn purge(&mut self, now: Instant, mask: u32) -> Result<()> {
        self.check_running()?;
        if mask == 0 || mask & !purge::ALL != 0 {
            return Err(QueueError::InvalidLength.into());
        }

        if mask & purge::TX_ABORT != 0 {
            for req in self.write_slot.drain_queue() {
                self.release_queued_write(&req);
                self.finish_request(req, CompletionStatus::Cancelled);
            }
            self.cancel_current_write(now);
            if self.xoff_slot.is_some() {
                self.cancel_current_xoff();
            }
            if self.immediate_slot.is_some() {
                self.cancel_current_immediate();
            }
        }

        if mask & purge::RX_ABORT != 0 {
            for req in self.read_slot.drain_queue() {
                self.finish_request(req, CompletionStatus::Cancelled);
            }
            self.cancel_current_read(now);
        }

        if mask & purge::TX_CLEAR != 0 && self.config.fifo.enabled {
            self.dev.write(
                UartRegister::FifoControl,
                fcr::ENABLE | fcr::CLEAR_TX | self.config.fifo.rx_trigger.to_fcr(),
            );
        }

        if mask & purge::RX_CLEAR != 0 {
            self.ring.purge();
            if self.config.fifo.enabled {
                self.dev.write(
                    UartRegister::FifoControl,
                    fcr::ENABLE | fcr::CLEAR_RX | self.config.fifo.rx_trigger.to_fcr(),
                );
            }
            self.eof_received = false;
            self.handle_reduced_ring();
        }

        Ok(())
    }

    /// Undo the queue accounting of a write-side request that never
    /// became current.
    fn release_queued_write(&mut self, req: &Request) {
        match &req.body {
            super::request::RequestBody::Write { data } => {
                self.total_chars_queued -= data.len();
            }
            super::request::RequestBody::XoffCounter { .. } => {
                self.total_chars_queued -= 1;
            }
            _ => {}
        }
    }

    // =========================================================================
    // Deferred Work & Completions
    // =========================================================================

    /// Run deferred callbacks and expired timers.
    ///
    /// Call after [`handle_interrupt`](Self::handle_interrupt) reports
    /// deferred work, and whenever the previously returned deadline
    /// passes. Returns the next deadline to program, if any.
    pub fn poll(&mut self, now: Instant) -> Option<Instant> {
        loop {
            while let Some(dpc) = self.deferred.pop_front() {
                self.run_dpc(now, dpc);
            }
            if let Some(timer) = self.timers.pop_expired(now) {
                self.run_timer(now, timer);
                continue;
            }
            if self.deferred.is_empty() {
                break;
            }
        }
        self.timers.next_deadline()
    }

    /// Take the oldest pending completion.
    pub fn take_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }

    /// Take the completion of a specific request, leaving others queued.
    pub fn take_completion_of(&mut self, id: RequestId) -> Option<Completion> {
        let pos = self.completions.iter().position(|c| c.id == id)?;
        self.completions.remove(pos)
    }

    /// Number of undelivered completions.
    #[inline(always)]
    pub fn completions_pending(&self) -> usize {
        self.completions.len()
    }

    fn run_dpc(&mut self, now: Instant, dpc: Dpc) {
        match dpc {
            Dpc::ReadComplete => self.complete_read_from_isr(now),
            Dpc::WriteComplete => self.complete_write_from_isr(now),
            Dpc::ImmediateComplete => self.complete_immediate_from_isr(),
            Dpc::XoffDone => self.complete_xoff_from_isr(),
            Dpc::WaitComplete => self.complete_wait(),
            Dpc::CommError => self.comm_error_abort(now),
            Dpc::StartTimerLowerRts => self.start_timer_lower_rts(now),
            Dpc::HardwareGone => self.hardware_gone(now),
        }
    }

    fn run_timer(&mut self, now: Instant, timer: TimerId) {
        match timer {
            TimerId::ReadTotal => self.read_total_timeout(now),
            TimerId::ReadInterval => self.read_interval_timeout(now),
            TimerId::WriteTotal => self.write_total_timeout(now),
            TimerId::ImmediateTotal => self.immediate_total_timeout(),
            TimerId::XoffCount => self.xoff_count_timeout(),
            TimerId::LowerRts => self.perhaps_lower_rts(),
        }
    }

    /// Line errors with abort-on-error configured: terminate the in-flight
    /// read and write so the client observes the failure promptly.
    fn comm_error_abort(&mut self, now: Instant) {
        if self.error_word == 0 {
            return;
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("comm error {=u32:x}, aborting in-flight io", self.error_word);

        self.abort_current_read(now, CompletionStatus::SerialError);
        self.abort_current_write(now, CompletionStatus::SerialError);
    }

    /// The hardware is gone: fail everything, park the port.
    fn hardware_gone(&mut self, now: Instant) {
        if self.state == State::Gone {
            return;
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("hardware vanished, failing all requests");

        // Parking the state first keeps the completion paths from
        // starting (and possibly satisfying) queued requests.
        self.state = State::Gone;

        while self.read_slot.current.is_some() {
            self.abort_current_read(now, CompletionStatus::NoSuchDevice);
        }
        while self.write_slot.current.is_some() {
            self.abort_current_write(now, CompletionStatus::NoSuchDevice);
        }
        for req in self.read_slot.drain_queue() {
            self.finish_request(req, CompletionStatus::NoSuchDevice);
        }
        for req in self.write_slot.drain_queue() {
            self.release_queued_write(&req);
            self.finish_request(req, CompletionStatus::NoSuchDevice);
        }
        if self.xoff_slot.is_some() {
            self.abort_xoff_counter(now, CompletionStatus::NoSuchDevice);
        }
        if self.immediate_slot.is_some() {
            self.grab_immediate_from_isr();
            if let Some(req) = self.immediate_slot.take() {
                self.finish_request(req, CompletionStatus::NoSuchDevice);
            }
        }
        if let Some(req) = self.wait_slot.take() {
            self.finish_request(req, CompletionStatus::NoSuchDevice);
        }

        for timer in [
            TimerId::ReadTotal,
            TimerId::ReadInterval,
            TimerId::WriteTotal,
            TimerId::ImmediateTotal,
            TimerId::XoffCount,
            TimerId::LowerRts,
        ] {
            self.timers.cancel(timer);
        }
    }

    /// The earliest armed timer deadline, for platforms that program a
    /// one-shot hardware timer instead of ticking.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
