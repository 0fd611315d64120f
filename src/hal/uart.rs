//! UART register abstraction for the 8250/16550 family.
//!
//! The request engine never touches memory-mapped I/O directly. All register
//! traffic goes through the [`UartDevice`] trait so the same engine runs on
//! port-mapped x86 UARTs, memory-mapped SoC UARTs, and the host-side mock
//! used by the unit tests.
//!
//! # Register side effects
//!
//! The 16550 couples state changes to register reads:
//!
//! - Reading [`UartRegister::LineStatus`] clears the latched error bits
//!   (overrun, parity, framing, break).
//! - Reading [`UartRegister::ModemStatus`] clears the delta bits
//!   (DCTS, DDSR, TERI, DDCD).
//! - Reading [`UartRegister::Data`] pops one byte from the RX FIFO.
//!
//! Implementations must preserve these semantics; the interrupt service
//! code relies on them.
//!
//! # Divisor latch access
//!
//! [`UartRegister::DivisorLo`] and [`UartRegister::DivisorHi`] address the
//! baud divisor latches directly. On real silicon these share addresses
//! with `Data` and `InterruptEnable` behind the DLAB bit; an implementation
//! for such hardware is responsible for setting and clearing DLAB around
//! the access.

// =============================================================================
// Register Selectors
// =============================================================================

/// A register of the 8250/16550 register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UartRegister {
    /// RX buffer (read) / TX holding register (write)
    Data,
    /// Interrupt enable register (IER)
    InterruptEnable,
    /// Interrupt identification register (IIR, read-only)
    InterruptIdent,
    /// FIFO control register (FCR, write-only)
    FifoControl,
    /// Line control register (LCR)
    LineControl,
    /// Modem control register (MCR)
    ModemControl,
    /// Line status register (LSR, read clears error bits)
    LineStatus,
    /// Modem status register (MSR, read clears delta bits)
    ModemStatus,
    /// Scratch register
    Scratch,
    /// Divisor latch LSB (behind DLAB on real hardware)
    DivisorLo,
    /// Divisor latch MSB (behind DLAB on real hardware)
    DivisorHi,
}

// =============================================================================
// Device Contract
// =============================================================================

/// Byte-addressable access to one UART's register file.
///
/// The engine calls this from dispatch paths and from the interrupt service
/// routine; implementations must be safe to call from interrupt context and
/// must never block.
///
/// # Example
///
/// ```ignore
/// struct PortIo { base: u16 }
///
/// impl UartDevice for PortIo {
///     fn read(&mut self, reg: UartRegister) -> u8 {
///         unsafe { inb(self.base + offset_of(reg)) }
///     }
///     fn write(&mut self, reg: UartRegister, value: u8) {
///         unsafe { outb(self.base + offset_of(reg), value) }
///     }
/// }
/// ```
pub trait UartDevice {
    /// Read a register, with the chip's documented read side effects.
    fn read(&mut self, reg: UartRegister) -> u8;

    /// Write a register.
    fn write(&mut self, reg: UartRegister, value: u8);
}

// =============================================================================
// Register Bit Definitions
// =============================================================================

/// Line status register bits
pub mod lsr {
    /// Data ready
    pub const DR: u8 = 0x01;
    /// Overrun error
    pub const OE: u8 = 0x02;
    /// Parity error
    pub const PE: u8 = 0x04;
    /// Framing error
    pub const FE: u8 = 0x08;
    /// Break indication
    pub const BI: u8 = 0x10;
    /// Transmit holding register empty
    pub const THRE: u8 = 0x20;
    /// Transmitter empty (holding and shift registers)
    pub const TEMT: u8 = 0x40;
    /// Error in RX FIFO
    pub const FIFOERR: u8 = 0x80;

    /// All receive error conditions
    pub const ERROR_BITS: u8 = OE | PE | FE | BI;
}

/// Modem status register bits
pub mod msr {
    /// Delta clear to send
    pub const DCTS: u8 = 0x01;
    /// Delta data set ready
    pub const DDSR: u8 = 0x02;
    /// Trailing edge of ring indicator
    pub const TERI: u8 = 0x04;
    /// Delta data carrier detect
    pub const DDCD: u8 = 0x08;
    /// Clear to send
    pub const CTS: u8 = 0x10;
    /// Data set ready
    pub const DSR: u8 = 0x20;
    /// Ring indicator
    pub const RI: u8 = 0x40;
    /// Data carrier detect
    pub const DCD: u8 = 0x80;

    /// All delta bits
    pub const DELTA_BITS: u8 = DCTS | DDSR | TERI | DDCD;
}

/// Interrupt enable register bits
pub mod ier {
    /// Received data available
    pub const RX_DATA: u8 = 0x01;
    /// Transmit holding register empty
    pub const THR_EMPTY: u8 = 0x02;
    /// Receiver line status
    pub const RX_STATUS: u8 = 0x04;
    /// Modem status
    pub const MODEM_STATUS: u8 = 0x08;

    /// Everything the engine services
    pub const ALL: u8 = RX_DATA | THR_EMPTY | RX_STATUS | MODEM_STATUS;
}

/// Interrupt identification register values
pub mod iir {
    /// No interrupt pending (bit 0 set)
    pub const NONE: u8 = 0x01;
    /// Modem status change
    pub const MODEM_STATUS: u8 = 0x00;
    /// Transmit holding register empty
    pub const THR_EMPTY: u8 = 0x02;
    /// Received data available
    pub const RX_DATA: u8 = 0x04;
    /// Receiver line status
    pub const RX_STATUS: u8 = 0x06;
    /// Character timeout (FIFO non-empty, no recent reads)
    pub const CHAR_TIMEOUT: u8 = 0x0C;

    /// Mask selecting the cause field (and the pending bit)
    pub const CAUSE_MASK: u8 = 0x0F;
}

/// Line control register bits
pub mod lcr {
    /// Word length select mask (bits 0-1)
    pub const WORD_LEN_MASK: u8 = 0x03;
    /// Extra stop bit(s)
    pub const STOP_EXTRA: u8 = 0x04;
    /// Parity enable
    pub const PARITY_ENABLE: u8 = 0x08;
    /// Even parity select
    pub const PARITY_EVEN: u8 = 0x10;
    /// Sticky parity
    pub const PARITY_STICK: u8 = 0x20;
    /// Break control
    pub const BREAK: u8 = 0x40;
    /// Divisor latch access bit
    pub const DLAB: u8 = 0x80;
}

/// Modem control register bits
pub mod mcr {
    /// Data terminal ready
    pub const DTR: u8 = 0x01;
    /// Request to send
    pub const RTS: u8 = 0x02;
    /// Auxiliary output 1
    pub const OUT1: u8 = 0x04;
    /// Auxiliary output 2 (gates the IRQ line on PC hardware)
    pub const OUT2: u8 = 0x08;
    /// Loopback mode
    pub const LOOPBACK: u8 = 0x10;
}

/// FIFO control register bits
pub mod fcr {
    /// FIFO enable
    pub const ENABLE: u8 = 0x01;
    /// Clear the receive FIFO
    pub const CLEAR_RX: u8 = 0x02;
    /// Clear the transmit FIFO
    pub const CLEAR_TX: u8 = 0x04;
    /// RX trigger level: 1 byte
    pub const TRIGGER_1: u8 = 0x00;
    /// RX trigger level: 4 bytes
    pub const TRIGGER_4: u8 = 0x40;
    /// RX trigger level: 8 bytes
    pub const TRIGGER_8: u8 = 0x80;
    /// RX trigger level: 14 bytes
    pub const TRIGGER_14: u8 = 0xC0;
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsr_error_bits_cover_all_errors() {
        assert_eq!(lsr::ERROR_BITS, lsr::OE | lsr::PE | lsr::FE | lsr::BI);
        assert_eq!(lsr::ERROR_BITS & lsr::DR, 0);
        assert_eq!(lsr::ERROR_BITS & (lsr::THRE | lsr::TEMT), 0);
    }

    #[test]
    fn msr_delta_bits_are_low_nibble() {
        assert_eq!(msr::DELTA_BITS, 0x0F);
    }

    #[test]
    fn ier_all_enables_every_source() {
        assert_eq!(
            ier::ALL,
            ier::RX_DATA | ier::THR_EMPTY | ier::RX_STATUS | ier::MODEM_STATUS
        );
    }

    #[test]
    fn iir_causes_are_distinct() {
        let causes = [
            iir::MODEM_STATUS,
            iir::THR_EMPTY,
            iir::RX_DATA,
            iir::RX_STATUS,
            iir::CHAR_TIMEOUT,
        ];
        for (i, a) in causes.iter().enumerate() {
            for b in &causes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        // The pending bit is never part of a real cause value.
        for cause in causes {
            assert_eq!(cause & iir::NONE, 0);
        }
    }

    #[test]
    fn register_selector_is_copy_eq() {
        let reg = UartRegister::LineStatus;
        let copy = reg;
        assert_eq!(reg, copy);
        assert_ne!(reg, UartRegister::ModemStatus);
    }
}
