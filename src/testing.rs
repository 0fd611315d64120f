//! Testing utilities and mock implementations
//!
//! This module provides a wire-level 16550 mock for exercising the engine
//! on the host without hardware access, plus a small bench harness that
//! pumps interrupts and deferred work the way platform glue would.
//!
//! Only available when running `cargo test`.

#![cfg(test)]
#![allow(missing_docs)]

extern crate std;

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::driver::port::Port;
use crate::driver::request::Completion;
use crate::hal::uart::{UartDevice, UartRegister, ier, iir, lsr, mcr, msr};
use crate::{Instant, PortConfig};

// =============================================================================
// Mock UART
// =============================================================================

/// Shared wire-level state behind the mock register file.
#[derive(Debug, Default)]
struct WireState {
    /// Bytes that arrived on the wire, not yet read out of the RX FIFO
    rx_fifo: VecDeque<u8>,
    /// Bytes the engine transmitted
    tx_log: Vec<u8>,

    ier: u8,
    lcr: u8,
    mcr: u8,
    fcr: u8,
    scratch: u8,
    divisor_lo: u8,
    divisor_hi: u8,

    /// Latched line error bits (OE/PE/FE/BI), cleared by an LSR read
    lsr_errors: u8,
    /// Current modem input levels (CTS/DSR/RI/DCD bits)
    msr_lines: u8,
    /// Latched delta bits, cleared by an MSR read
    msr_deltas: u8,

    /// Latched transmit-holding-empty interrupt
    thre_irq: bool,
    /// Simulate vanished hardware: every IIR read returns 0xFF
    gone: bool,
}

impl WireState {
    /// The asserted interrupt cause, in the chip's priority order.
    fn pending_cause(&self) -> Option<u8> {
        if self.lsr_errors != 0 && self.ier & ier::RX_STATUS != 0 {
            return Some(iir::RX_STATUS);
        }
        if !self.rx_fifo.is_empty() && self.ier & ier::RX_DATA != 0 {
            return Some(iir::RX_DATA);
        }
        if self.thre_irq && self.ier & ier::THR_EMPTY != 0 {
            return Some(iir::THR_EMPTY);
        }
        if self.msr_deltas != 0 && self.ier & ier::MODEM_STATUS != 0 {
            return Some(iir::MODEM_STATUS);
        }
        None
    }

    fn lsr_value(&self) -> u8 {
        let mut value = lsr::THRE | lsr::TEMT;
        if !self.rx_fifo.is_empty() {
            value |= lsr::DR;
        }
        value | self.lsr_errors
    }
}

/// The test's handle onto the wire: inject traffic, flip modem lines,
/// observe transmissions.
#[derive(Clone)]
pub struct Wire {
    state: Rc<RefCell<WireState>>,
}

impl Wire {
    /// Put bytes on the wire for the engine to receive.
    pub fn inject_rx(&self, bytes: &[u8]) {
        let mut st = self.state.borrow_mut();
        st.rx_fifo.extend(bytes.iter().copied());
    }

    /// Latch line error bits (`lsr::OE` / `PE` / `FE` / `BI`).
    pub fn inject_line_error(&self, bits: u8) {
        self.state.borrow_mut().lsr_errors |= bits;
    }

    /// Set the modem input levels; delta bits latch automatically, with
    /// the ring-indicator delta on its trailing edge.
    pub fn set_modem_lines(&self, lines: u8) {
        let mut st = self.state.borrow_mut();
        let old = st.msr_lines;
        let changed = old ^ lines;

        if changed & msr::CTS != 0 {
            st.msr_deltas |= msr::DCTS;
        }
        if changed & msr::DSR != 0 {
            st.msr_deltas |= msr::DDSR;
        }
        if changed & msr::DCD != 0 {
            st.msr_deltas |= msr::DDCD;
        }
        if old & msr::RI != 0 && lines & msr::RI == 0 {
            st.msr_deltas |= msr::TERI;
        }
        st.msr_lines = lines;
    }

    /// Pull the hardware out from under the driver.
    pub fn set_gone(&self) {
        self.state.borrow_mut().gone = true;
    }

    /// Everything transmitted so far.
    pub fn tx(&self) -> Vec<u8> {
        self.state.borrow().tx_log.clone()
    }

    /// Take and clear the transmit log.
    pub fn take_tx(&self) -> Vec<u8> {
        core::mem::take(&mut self.state.borrow_mut().tx_log)
    }

    /// Whether the interrupt line is asserted.
    pub fn irq_pending(&self) -> bool {
        self.state.borrow().pending_cause().is_some()
    }

    /// Current DTR output level.
    pub fn dtr(&self) -> bool {
        self.state.borrow().mcr & mcr::DTR != 0
    }

    /// Current RTS output level.
    pub fn rts(&self) -> bool {
        self.state.borrow().mcr & mcr::RTS != 0
    }

    /// Bytes still waiting in the mock RX FIFO (not yet taken by the
    /// engine).
    pub fn rx_backlog(&self) -> usize {
        self.state.borrow().rx_fifo.len()
    }
}

/// Mock 16550 register file over shared wire state.
pub struct MockUart {
    state: Rc<RefCell<WireState>>,
}

impl MockUart {
    /// Create a device / wire pair.
    pub fn new() -> (Self, Wire) {
        let state = Rc::new(RefCell::new(WireState::default()));
        (
            Self {
                state: Rc::clone(&state),
            },
            Wire { state },
        )
    }
}

impl UartDevice for MockUart {
    fn read(&mut self, reg: UartRegister) -> u8 {
        let mut st = self.state.borrow_mut();
        match reg {
            UartRegister::Data => st.rx_fifo.pop_front().unwrap_or(0),
            UartRegister::InterruptEnable => st.ier,
            UartRegister::InterruptIdent => {
                if st.gone {
                    return 0xFF;
                }
                match st.pending_cause() {
                    Some(cause) => {
                        // Reading the IIR acknowledges a THRE interrupt.
                        if cause == iir::THR_EMPTY {
                            st.thre_irq = false;
                        }
                        cause
                    }
                    None => iir::NONE,
                }
            }
            UartRegister::FifoControl => 0,
            UartRegister::LineControl => st.lcr,
            UartRegister::ModemControl => st.mcr,
            UartRegister::LineStatus => {
                let value = st.lsr_value();
                st.lsr_errors = 0;
                value
            }
            UartRegister::ModemStatus => {
                let value = st.msr_lines | st.msr_deltas;
                st.msr_deltas = 0;
                value
            }
            UartRegister::Scratch => st.scratch,
            UartRegister::DivisorLo => st.divisor_lo,
            UartRegister::DivisorHi => st.divisor_hi,
        }
    }

    fn write(&mut self, reg: UartRegister, value: u8) {
        let mut st = self.state.borrow_mut();
        match reg {
            UartRegister::Data => {
                // Infinite-speed transmitter: the byte hits the wire and
                // the holding register is empty again.
                st.tx_log.push(value);
                st.thre_irq = true;
            }
            UartRegister::InterruptEnable => {
                let was_enabled = st.ier & ier::THR_EMPTY != 0;
                st.ier = value;
                // Enabling THRE with the register empty re-signals, which
                // is what the engine's transmit kick relies on.
                if !was_enabled && value & ier::THR_EMPTY != 0 {
                    st.thre_irq = true;
                }
            }
            UartRegister::FifoControl => {
                st.fcr = value;
                if value & crate::hal::uart::fcr::CLEAR_RX != 0 {
                    st.rx_fifo.clear();
                }
            }
            UartRegister::LineControl => st.lcr = value,
            UartRegister::ModemControl => st.mcr = value,
            UartRegister::LineStatus | UartRegister::ModemStatus | UartRegister::InterruptIdent => {}
            UartRegister::Scratch => st.scratch = value,
            UartRegister::DivisorLo => st.divisor_lo = value,
            UartRegister::DivisorHi => st.divisor_hi = value,
        }
    }
}

// =============================================================================
// Bench Harness
// =============================================================================

/// An initialized port on a mock wire, with manual time.
pub struct Bench {
    pub port: Port<MockUart>,
    pub wire: Wire,
    pub now: Instant,
}

impl Bench {
    /// Build a bench around a configuration; panics on init failure.
    pub fn new(config: PortConfig) -> Self {
        let (dev, wire) = MockUart::new();
        let mut port = Port::new(dev);
        port.init(config).unwrap();
        let mut bench = Self {
            port,
            wire,
            now: Instant::ZERO,
        };
        // Drain the bring-up kick so tests start quiescent.
        bench.pump();
        while bench.port.take_completion().is_some() {}
        bench
    }

    /// 9600 8N1, FIFOs on, no flow control, 1 KiB ring.
    pub fn with_defaults() -> Self {
        Self::new(PortConfig::new())
    }

    /// Service interrupts and deferred work until quiescent.
    pub fn pump(&mut self) {
        for _ in 0..128 {
            let had_irq = self.wire.irq_pending();
            if had_irq {
                self.port.handle_interrupt();
            }
            self.port.poll(self.now);
            if !self.wire.irq_pending() {
                break;
            }
        }
    }

    /// Move time forward and pump, one millisecond per step so timers
    /// observe every tick the way a real clock would deliver them.
    pub fn advance(&mut self, ms: u64) {
        for _ in 0..ms {
            self.now = Instant::from_millis(self.now.millis() + 1);
            self.pump();
        }
    }

    /// Put bytes on the wire and pump them through.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.wire.inject_rx(bytes);
        self.pump();
    }

    /// Take the oldest completion, if any.
    pub fn completion(&mut self) -> Option<Completion> {
        self.port.take_completion()
    }

    /// Take the oldest completion; panics when none is pending.
    pub fn expect_completion(&mut self) -> Completion {
        self.port
            .take_completion()
            .expect("expected a pending completion")
    }
}

// =============================================================================
// Mock Self-Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_rx_fifo_read() {
        let (mut dev, wire) = MockUart::new();
        wire.inject_rx(b"ab");

        assert_eq!(dev.read(UartRegister::LineStatus) & lsr::DR, lsr::DR);
        assert_eq!(dev.read(UartRegister::Data), b'a');
        assert_eq!(dev.read(UartRegister::Data), b'b');
        assert_eq!(dev.read(UartRegister::LineStatus) & lsr::DR, 0);
    }

    #[test]
    fn mock_tx_logs_and_relatches_thre() {
        let (mut dev, wire) = MockUart::new();
        dev.write(UartRegister::InterruptEnable, ier::ALL);
        // The enable transition latched a THRE interrupt.
        assert!(wire.irq_pending());
        assert_eq!(dev.read(UartRegister::InterruptIdent), iir::THR_EMPTY);
        // Acknowledged: line drops.
        assert!(!wire.irq_pending());

        dev.write(UartRegister::Data, 0x55);
        assert_eq!(wire.tx(), [0x55]);
        assert!(wire.irq_pending());
    }

    #[test]
    fn mock_lsr_errors_clear_on_read() {
        let (mut dev, wire) = MockUart::new();
        wire.inject_line_error(lsr::FE);

        let status = dev.read(UartRegister::LineStatus);
        assert_eq!(status & lsr::FE, lsr::FE);
        let status = dev.read(UartRegister::LineStatus);
        assert_eq!(status & lsr::FE, 0);
    }

    #[test]
    fn mock_msr_deltas_latch_and_clear() {
        let (mut dev, wire) = MockUart::new();
        wire.set_modem_lines(msr::CTS | msr::DSR);

        let status = dev.read(UartRegister::ModemStatus);
        assert_eq!(status & msr::DCTS, msr::DCTS);
        assert_eq!(status & msr::DDSR, msr::DDSR);
        assert_eq!(status & (msr::CTS | msr::DSR), msr::CTS | msr::DSR);

        let status = dev.read(UartRegister::ModemStatus);
        assert_eq!(status & msr::DELTA_BITS, 0);
    }

    #[test]
    fn mock_ring_indicator_trailing_edge() {
        let (mut dev, wire) = MockUart::new();
        wire.set_modem_lines(msr::RI);
        dev.read(UartRegister::ModemStatus);

        wire.set_modem_lines(0);
        let status = dev.read(UartRegister::ModemStatus);
        assert_eq!(status & msr::TERI, msr::TERI);
    }

    #[test]
    fn mock_iir_priority_line_status_first() {
        let (mut dev, wire) = MockUart::new();
        dev.write(UartRegister::InterruptEnable, ier::ALL);
        dev.read(UartRegister::InterruptIdent); // ack bring-up THRE
        wire.inject_rx(b"x");
        wire.inject_line_error(lsr::PE);

        assert_eq!(dev.read(UartRegister::InterruptIdent), iir::RX_STATUS);
        dev.read(UartRegister::LineStatus);
        assert_eq!(dev.read(UartRegister::InterruptIdent), iir::RX_DATA);
    }

    #[test]
    fn mock_gone_reads_all_ones() {
        let (mut dev, wire) = MockUart::new();
        wire.set_gone();
        assert_eq!(dev.read(UartRegister::InterruptIdent), 0xFF);
    }

    #[test]
    fn bench_initializes_quiescent() {
        let mut bench = Bench::with_defaults();
        assert!(bench.completion().is_none());
        assert!(!bench.wire.irq_pending());
        assert_eq!(bench.port.state(), crate::State::Running);
    }
}
