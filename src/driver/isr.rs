//! Interrupt service for the serial port engine.
//!
//! [`Port::handle_interrupt`] is the hardware ISR entry point. One
//! invocation drains every asserted cause in the chip's priority order:
//! line status, received data (including FIFO character timeout), transmit
//! holding empty, then modem status. The routine never blocks and never
//! completes requests directly; completions and other slow work are pushed
//! onto the deferred queue and run from [`Port::poll`](crate::Port::poll).
//!
//! Under [`SharedPort`](crate::sync::SharedPort) this runs inside the
//! critical section, which is what makes the dispatch-side "interrupt
//! synchronize" sections atomic with respect to this code.

use super::config::comm_error;
use super::flow::{rxhold, txhold};
use super::port::{Dpc, LastRead, Port, ReadTarget};
use super::request::RequestBody;
use super::wait::event;
use crate::hal::uart::{UartDevice, UartRegister, iir, lsr};

/// Escape-insertion tags, the middle byte of an `[escape, tag, value]`
/// triple placed in the RX stream.
pub mod lsrmst {
    /// A literal reception of the escape character itself
    pub const ESCAPE: u8 = 0x00;
    /// A line status value follows
    pub const LSR: u8 = 0x01;
    /// A modem status value follows
    pub const MST: u8 = 0x03;
}

/// Safety valve: causes drained in one ISR invocation before the engine
/// assumes a wedged interrupt line.
const MAX_ISR_PASSES: u32 = 1024;

// =============================================================================
// ISR Summary
// =============================================================================

/// What one interrupt invocation did, for the platform glue.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IsrSummary {
    /// At least one cause was serviced
    pub serviced: bool,
    /// Receive data was drained
    pub rx: bool,
    /// Transmit work was fed
    pub tx: bool,
    /// A line status cause was handled
    pub line_status: bool,
    /// A modem status cause was handled
    pub modem_status: bool,
    /// Deferred work is queued; the platform should schedule a `poll`
    pub deferred_pending: bool,
}

// =============================================================================
// Interrupt Service Implementation
// =============================================================================

impl<U: UartDevice> Port<U> {
    /// Service the UART interrupt.
    ///
    /// Call from the platform's interrupt handler (via
    /// [`SharedPort::with`](crate::sync::SharedPort::with) when the
    /// `critical-section` feature is enabled). Returns a summary whose
    /// `deferred_pending` flag tells the platform to schedule a
    /// [`poll`](Self::poll).
    pub fn handle_interrupt(&mut self) -> IsrSummary {
        let mut summary = IsrSummary::default();
        if self.state != super::config::State::Running {
            return summary;
        }

        let mut passes = 0;
        loop {
            let ident = self.dev.read(UartRegister::InterruptIdent);

            // A floating bus reads all-ones; two consecutive passes mean
            // the hardware is gone.
            if ident == 0xFF {
                self.dead_iir_passes += 1;
                if self.dead_iir_passes >= 2 {
                    self.deferred.push_back(Dpc::HardwareGone);
                }
                break;
            }
            self.dead_iir_passes = 0;

            if ident & iir::NONE != 0 {
                break;
            }
            passes += 1;
            if passes > MAX_ISR_PASSES {
                break;
            }
            summary.serviced = true;

            match ident & iir::CAUSE_MASK {
                iir::RX_STATUS => {
                    self.process_lsr();
                    summary.line_status = true;
                }
                iir::RX_DATA | iir::CHAR_TIMEOUT => {
                    self.service_rx();
                    summary.rx = true;
                }
                iir::THR_EMPTY => {
                    self.service_tx();
                    summary.tx = true;
                }
                iir::MODEM_STATUS => {
                    self.handle_modem_update(false);
                    summary.modem_status = true;
                }
                _ => break,
            }
        }

        summary.deferred_pending = !self.deferred.is_empty();
        summary
    }

    // =========================================================================
    // Line Status
    // =========================================================================

    /// Read the line status register and absorb its side effects: error
    /// accounting, events, optional substitutions, and the holding-empty
    /// shadow used by the transmit path.
    pub(super) fn process_lsr(&mut self) -> u8 {
        let status = self.dev.read(UartRegister::LineStatus);
        self.holding_empty = status & lsr::THRE != 0;

        if status & (lsr::ERROR_BITS) != 0 {
            if status & lsr::OE != 0 {
                self.error_word |= comm_error::OVERRUN;
                self.stats.serial_overruns = self.stats.serial_overruns.wrapping_add(1);
                self.note_event(event::ERR);
            }
            if status & lsr::PE != 0 {
                self.error_word |= comm_error::PARITY;
                self.stats.parity_errors = self.stats.parity_errors.wrapping_add(1);
                self.note_event(event::ERR);
                if self.config.chars.error_replace {
                    self.put_char(self.config.chars.error);
                }
            }
            if status & lsr::FE != 0 {
                self.error_word |= comm_error::FRAMING;
                self.stats.frame_errors = self.stats.frame_errors.wrapping_add(1);
                self.note_event(event::ERR);
                if self.config.chars.error_replace {
                    self.put_char(self.config.chars.error);
                }
            }
            if status & lsr::BI != 0 {
                self.error_word |= comm_error::BREAK;
                self.note_event(event::BREAK);
                if self.config.chars.break_replace {
                    self.put_char(self.config.chars.break_char);
                }
            }

            if self.escape_char != 0 {
                self.insert_escape_triple(lsrmst::LSR, status);
            }

            if self.config.handflow.abort_on_error {
                self.deferred.push_back(Dpc::CommError);
            }
        }

        status
    }

    // =========================================================================
    // Receive
    // =========================================================================

    /// Drain every byte the hardware has, routing each through flow
    /// control, special-character handling, and delivery.
    fn service_rx(&mut self) {
        loop {
            let status = self.process_lsr();
            if status & lsr::DR == 0 {
                break;
            }

            let raw = self.dev.read(UartRegister::Data);
            let byte = raw & self.config.line.word_length.data_mask();
            self.stats.received = self.stats.received.wrapping_add(1);

            // Auto-transmit flow characters are consumed, never delivered.
            if self.config.handflow.auto_transmit {
                if byte == self.config.chars.xoff {
                    self.tx_holding |= txhold::XOFF;
                    if self.config.handflow.rts
                        == super::config::RtsMode::TransmitToggle
                    {
                        self.rts_lower_count += 1;
                        self.deferred.push_back(Dpc::StartTimerLowerRts);
                    }
                    continue;
                }
                if byte == self.config.chars.xon {
                    let was_holding = self.tx_holding;
                    self.tx_holding &= !txhold::XOFF;
                    if was_holding != 0
                        && self.tx_holding == 0
                        && self.has_tx_bytes_pending()
                        && self.holding_empty
                    {
                        self.kick_transmit();
                    }
                    continue;
                }
            }

            // DSR sensitivity discards everything while the line is down.
            if self.rx_holding & rxhold::DSR != 0 {
                continue;
            }

            if self.config.chars.strip_null && byte == 0 {
                continue;
            }

            if self.config.chars.event != 0 && byte == self.config.chars.event {
                self.note_event(event::RXFLAG);
            }
            if self.config.chars.error != 0 && byte == self.config.chars.error {
                self.note_event(event::ERR);
            }
            if self.config.chars.eof != 0 && byte == self.config.chars.eof {
                self.eof_received = true;
            }

            if self.escape_char != 0 && byte == self.escape_char {
                // A literal escape character gets tagged so consumers can
                // tell it apart from an inserted triple.
                self.insert_escape_triple(lsrmst::ESCAPE, byte);
            } else {
                self.deliver_rx_byte(byte);
            }

            self.note_event(event::RXCHAR);

            // A counting xoff counter absorbs any received byte.
            if self.count_since_xoff > 0 {
                self.count_since_xoff -= 1;
                if self.count_since_xoff == 0 {
                    self.deferred.push_back(Dpc::XoffDone);
                }
            }
        }
    }

    /// Put one byte where the read pipeline wants it: the donated user
    /// buffer when a read has been handed to the ISR, the ring otherwise.
    fn deliver_rx_byte(&mut self, byte: u8) {
        match self.read_target {
            ReadTarget::User => {
                let needed = self.needed_for_read;
                if let Some(req) = self.read_slot.current.as_mut() {
                    if let RequestBody::Read {
                        buf, target_len, ..
                    } = &mut req.body
                    {
                        let pos = *target_len - needed;
                        buf[pos] = byte;
                        self.needed_for_read = needed - 1;
                        self.read_by_isr += 1;

                        if self.needed_for_read == 0 {
                            req.info = *target_len;
                            self.last_read = LastRead::Complete;
                            self.read_target = ReadTarget::Ring;
                            self.deferred.push_back(Dpc::ReadComplete);
                        }
                        return;
                    }
                }
                // Ownership says User but no read is current; fall back to
                // the ring rather than lose the byte.
                self.read_target = ReadTarget::Ring;
                self.put_char(byte);
            }
            ReadTarget::Ring => self.put_char(byte),
        }
    }

    /// Append to the ring, accounting an overrun if it is full, and run
    /// the fill-side flow policy.
    pub(super) fn put_char(&mut self, byte: u8) {
        if self.ring.push_byte(byte) {
            self.handle_grown_ring();
        } else {
            self.error_word |= comm_error::QUEUE_OVERRUN;
            self.stats.buffer_overruns = self.stats.buffer_overruns.wrapping_add(1);
            if self.config.handflow.abort_on_error {
                self.deferred.push_back(Dpc::CommError);
            }
        }
    }

    /// Insert an `[escape, tag, value]` triple into the RX stream.
    ///
    /// The triple shares the ring with data bytes, so bursts of status
    /// changes count toward the flow-control thresholds like any other
    /// reception.
    pub(super) fn insert_escape_triple(&mut self, tag: u8, value: u8) {
        let escape = self.escape_char;
        self.put_char(escape);
        self.put_char(tag);
        self.put_char(value);
    }

    // =========================================================================
    // Transmit
    // =========================================================================

    /// Feed the transmit holding register in priority order: flow
    /// characters, then the immediate character, then write data.
    fn service_tx(&mut self) {
        let status = self.process_lsr();
        if status & lsr::THRE == 0 {
            return;
        }

        // Line-level holds and break stop everything. An XOFF hold stops
        // user data only: the flow characters and the immediate character
        // still go out (that is how an XON escapes a paused port).
        let hard_hold =
            self.tx_holding & (txhold::CTS | txhold::DSR | txhold::DCD | txhold::BREAK);

        if self.send_xoff || self.send_xon {
            if hard_hold == 0 {
                if self.send_xoff {
                    let ch = self.config.chars.xoff;
                    self.transmit_byte(ch);
                    self.send_xoff = false;
                } else {
                    let ch = self.config.chars.xon;
                    self.transmit_byte(ch);
                    self.send_xon = false;
                    // The XON is on the wire; reception is open again.
                    self.rx_holding &= !rxhold::XOFF;
                }
            }
            return;
        }

        if self.transmit_immediate {
            if hard_hold == 0 {
                let ch = self.immediate_byte;
                self.transmit_byte(ch);
                self.transmit_immediate = false;
                self.deferred.push_back(Dpc::ImmediateComplete);
            }
            return;
        }

        if self.write_remaining > 0 {
            if self.tx_holding != 0 {
                return;
            }

            let burst = if self.config.fifo.enabled {
                usize::from(self.config.fifo.tx_fifo_depth.max(1))
            } else {
                1
            };
            let n = burst.min(self.write_remaining);

            for _ in 0..n {
                let ch = self.next_write_byte();
                self.transmit_byte(ch);
                self.write_remaining -= 1;
            }

            if self.write_remaining == 0 {
                if let Some(req) = self.write_slot.current.as_mut() {
                    if let RequestBody::Write { data } = &req.body {
                        req.info = data.len();
                    }
                }
                self.emptied_transmit = true;
                self.deferred.push_back(Dpc::WriteComplete);
            }
            return;
        }

        // Transmitter idle: deliver the tx-empty event once per drained
        // write, and let transmit toggle consider dropping RTS.
        if self.emptied_transmit && status & lsr::TEMT != 0 {
            self.emptied_transmit = false;
            self.note_event(event::TXEMPTY);
            if self.config.handflow.rts == super::config::RtsMode::TransmitToggle {
                self.rts_lower_count += 1;
                self.perhaps_lower_rts();
            }
        }
    }

    /// The next byte of the current write-side request.
    fn next_write_byte(&mut self) -> u8 {
        if let Some(req) = self.write_slot.current.as_ref() {
            match &req.body {
                RequestBody::Write { data } => {
                    let pos = data.len() - self.write_remaining;
                    data[pos]
                }
                RequestBody::XoffCounter { xoff_char, .. } => *xoff_char,
                _ => 0,
            }
        } else {
            0
        }
    }

    #[inline]
    fn transmit_byte(&mut self, byte: u8) {
        self.dev.write(UartRegister::Data, byte);
        self.holding_empty = false;
        self.stats.transmitted = self.stats.transmitted.wrapping_add(1);
    }

    // =========================================================================
    // Interrupt Plumbing
    // =========================================================================

    /// Force a fresh transmit-empty interrupt.
    ///
    /// The 8250 family signals transmit-holding-empty any time the enable
    /// bit transitions to one while the register is empty, so a disable /
    /// re-enable restarts a stalled pipeline through the normal interrupt
    /// path.
    pub(super) fn kick_transmit(&mut self) {
        let enables = self.dev.read(UartRegister::InterruptEnable);
        self.dev.write(UartRegister::InterruptEnable, 0);
        self.dev.write(UartRegister::InterruptEnable, enables);
    }

    /// Modem status read for dispatch-side queries; delta handling runs
    /// exactly as it would from the interrupt.
    pub(super) fn read_modem_status_synchronized(&mut self) -> u8 {
        self.handle_modem_update(false)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::uart::msr;

    #[test]
    fn lsrmst_tags_are_distinct() {
        assert_ne!(lsrmst::ESCAPE, lsrmst::LSR);
        assert_ne!(lsrmst::LSR, lsrmst::MST);
        assert_ne!(lsrmst::ESCAPE, lsrmst::MST);
    }

    #[test]
    fn summary_default_is_inert() {
        let summary = IsrSummary::default();
        assert!(!summary.serviced);
        assert!(!summary.rx);
        assert!(!summary.tx);
        assert!(!summary.deferred_pending);
    }

    #[test]
    fn msr_constants_referenced_by_flow() {
        // handle_modem_update depends on these exact encodings
        assert_eq!(msr::DELTA_BITS, 0x0F);
        assert_eq!(msr::CTS, 0x10);
        assert_eq!(msr::DCD, 0x80);
    }
}

// =============================================================================
// Bench Tests
// =============================================================================

#[cfg(test)]
mod bench_tests {
    extern crate std;

    use super::lsrmst;
    use crate::driver::config::comm_error;
    use crate::driver::request::CompletionStatus;
    use crate::hal::uart::{lsr, msr};
    use crate::testing::Bench;
    use crate::{HandFlow, PortConfig, SpecialChars, Timeouts};

    fn read_all(bench: &mut Bench, len: usize) -> alloc::vec::Vec<u8> {
        let id = bench.port.read(bench.now, len).unwrap();
        bench.pump();
        bench
            .port
            .take_completion_of(id)
            .expect("read did not complete")
            .data
            .unwrap()
    }

    fn quick_read_config() -> PortConfig {
        PortConfig::new().with_timeouts(Timeouts {
            read_interval: u32::MAX,
            ..Timeouts::default()
        })
    }

    #[test]
    fn line_errors_feed_statistics() {
        let mut bench = Bench::with_defaults();

        bench.wire.inject_line_error(lsr::PE | lsr::FE);
        bench.wire.inject_rx(b"x");
        bench.pump();
        bench.wire.inject_line_error(lsr::OE);
        bench.wire.inject_rx(b"y");
        bench.pump();

        let stats = bench.port.stats();
        assert_eq!(stats.parity_errors, 1);
        assert_eq!(stats.frame_errors, 1);
        assert_eq!(stats.serial_overruns, 1);
    }

    #[test]
    fn error_char_substitution() {
        let mut bench = Bench::new(quick_read_config().with_chars(SpecialChars {
            error: b'?',
            error_replace: true,
            ..SpecialChars::default()
        }));

        bench.wire.inject_line_error(lsr::PE);
        bench.wire.inject_rx(b"g");
        bench.pump();

        // The substituted character precedes the (still delivered) data.
        assert_eq!(read_all(&mut bench, 8), b"?g");
    }

    #[test]
    fn break_char_substitution_and_error_word() {
        let mut bench = Bench::new(quick_read_config().with_chars(SpecialChars {
            break_char: b'#',
            break_replace: true,
            ..SpecialChars::default()
        }));

        bench.wire.inject_line_error(lsr::BI);
        bench.wire.inject_rx(b"");
        bench.pump();

        assert_eq!(read_all(&mut bench, 8), b"#");
        assert_ne!(bench.port.comm_status().errors & comm_error::BREAK, 0);
    }

    #[test]
    fn null_stripping_discards_zero_bytes() {
        let mut bench = Bench::new(quick_read_config().with_chars(SpecialChars {
            strip_null: true,
            ..SpecialChars::default()
        }));

        bench.inject(&[b'a', 0, b'b', 0, 0, b'c']);
        assert_eq!(read_all(&mut bench, 8), b"abc");
    }

    #[test]
    fn error_char_reception_sets_err_event() {
        let mut bench = Bench::new(quick_read_config().with_chars(SpecialChars {
            error: b'!',
            ..SpecialChars::default()
        }));
        bench
            .port
            .set_wait_mask(crate::driver::wait::event::ERR)
            .unwrap();
        let id = bench.port.wait_on_mask().unwrap();

        bench.inject(b"ok");
        assert!(bench.port.take_completion_of(id).is_none());

        // A received byte matching the error character is an event; the
        // byte itself is still delivered.
        bench.inject(b"!");
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.events, crate::driver::wait::event::ERR);
        assert_eq!(read_all(&mut bench, 8), b"ok!");
    }

    #[test]
    fn eof_char_sets_status_flag() {
        let mut bench = Bench::new(quick_read_config().with_chars(SpecialChars {
            eof: 0x1A,
            ..SpecialChars::default()
        }));

        assert!(!bench.port.comm_status().eof_received);
        bench.inject(&[0x1A]);
        assert!(bench.port.comm_status().eof_received);
    }

    #[test]
    fn escape_insertion_wraps_modem_changes() {
        let mut bench = Bench::new(quick_read_config());
        bench.port.lsrmst_insert(0xFE).unwrap();

        bench.wire.set_modem_lines(msr::CTS);
        bench.pump();

        let data = read_all(&mut bench, 8);
        assert_eq!(data.len(), 3);
        assert_eq!(data[0], 0xFE);
        assert_eq!(data[1], lsrmst::MST);
        assert_ne!(data[2] & msr::DCTS, 0);
        assert_ne!(data[2] & msr::CTS, 0);
    }

    #[test]
    fn escape_insertion_tags_literal_escape_byte() {
        let mut bench = Bench::new(quick_read_config());
        bench.port.lsrmst_insert(0xFE).unwrap();

        bench.inject(&[b'a', 0xFE, b'b']);
        let data = read_all(&mut bench, 8);
        assert_eq!(data, [b'a', 0xFE, lsrmst::ESCAPE, 0xFE, b'b']);
    }

    #[test]
    fn escape_insertion_wraps_line_errors() {
        let mut bench = Bench::new(quick_read_config());
        bench.port.lsrmst_insert(0xFE).unwrap();

        bench.wire.inject_line_error(lsr::FE);
        bench.wire.inject_rx(b"x");
        bench.pump();

        let data = read_all(&mut bench, 8);
        assert_eq!(data[0], 0xFE);
        assert_eq!(data[1], lsrmst::LSR);
        assert_ne!(data[2] & lsr::FE, 0);
        assert_eq!(data[3], b'x');
    }

    #[test]
    fn ring_overrun_drops_bytes_and_flags_error() {
        let mut bench = Bench::new(PortConfig::new().with_ring_capacity(64));

        bench.inject(&[b'z'; 80]);

        let status = bench.port.comm_status();
        assert_eq!(status.in_queue, 64);
        assert_ne!(status.errors & comm_error::QUEUE_OVERRUN, 0);
        assert_eq!(bench.port.stats().buffer_overruns, 16);
    }

    #[test]
    fn abort_on_error_cancels_inflight_io() {
        let mut bench = Bench::new(
            PortConfig::new()
                .with_handflow(HandFlow {
                    abort_on_error: true,
                    ..HandFlow::default()
                })
                .with_timeouts(Timeouts {
                    read_total_constant: 60_000,
                    ..Timeouts::default()
                }),
        );

        let read = bench.port.read(bench.now, 16).unwrap();
        bench.port.set_xoff();
        let write = bench.port.write(bench.now, b"doomed").unwrap();
        bench.pump();

        bench.wire.inject_line_error(lsr::FE);
        bench.wire.inject_rx(b"x");
        bench.pump();

        let done = bench.port.take_completion_of(read).unwrap();
        assert_eq!(done.status, CompletionStatus::SerialError);
        let done = bench.port.take_completion_of(write).unwrap();
        assert_eq!(done.status, CompletionStatus::SerialError);
    }

    #[test]
    fn without_abort_on_error_io_survives_line_errors() {
        let mut bench = Bench::new(PortConfig::new().with_timeouts(Timeouts {
            read_total_constant: 60_000,
            ..Timeouts::default()
        }));
        let read = bench.port.read(bench.now, 4).unwrap();
        bench.pump();

        bench.wire.inject_line_error(lsr::FE);
        bench.wire.inject_rx(b"abcd");
        bench.pump();

        let done = bench.port.take_completion_of(read).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
    }

    #[test]
    fn donated_buffer_receives_bytes_directly() {
        let mut bench = Bench::new(PortConfig::new().with_timeouts(Timeouts {
            read_total_constant: 60_000,
            ..Timeouts::default()
        }));
        let id = bench.port.read(bench.now, 4).unwrap();
        bench.pump();

        // Bytes land in the user buffer, not the ring.
        bench.inject(b"12");
        assert_eq!(bench.port.comm_status().in_queue, 0);

        bench.inject(b"34");
        let done = bench.port.take_completion_of(id).unwrap();
        assert_eq!(done.status, CompletionStatus::Success);
        assert_eq!(done.data.as_deref(), Some(&b"1234"[..]));

        // Overflow past the satisfied read goes back to the ring.
        bench.inject(b"5");
        assert_eq!(bench.port.comm_status().in_queue, 1);
    }
}
