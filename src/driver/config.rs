//! Configuration types for the serial port engine

use crate::hal::uart::fcr;

/// Default RX ring capacity in bytes
pub const DEFAULT_RING_CAPACITY: usize = 1024;

/// Default input clock for the classic PC UART (1.8432 MHz)
pub const DEFAULT_CLOCK_HZ: u32 = 1_843_200;

/// Default RX FIFO trigger depth
pub const DEFAULT_RX_TRIGGER: RxTrigger = RxTrigger::Eight;

/// Default TX FIFO depth fed per transmit-empty interrupt
pub const DEFAULT_TX_FIFO_DEPTH: u8 = 14;

/// Word length in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WordLength {
    /// 5 data bits
    Five,
    /// 6 data bits
    Six,
    /// 7 data bits
    Seven,
    /// 8 data bits
    #[default]
    Eight,
}

impl WordLength {
    /// Number of data bits
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            WordLength::Five => 5,
            WordLength::Six => 6,
            WordLength::Seven => 7,
            WordLength::Eight => 8,
        }
    }

    /// LCR word-length field value
    #[must_use]
    pub const fn to_lcr(self) -> u8 {
        match self {
            WordLength::Five => 0b00,
            WordLength::Six => 0b01,
            WordLength::Seven => 0b10,
            WordLength::Eight => 0b11,
        }
    }

    /// Mask applied to every received byte for sub-8-bit words
    #[must_use]
    pub const fn data_mask(self) -> u8 {
        match self {
            WordLength::Five => 0x1F,
            WordLength::Six => 0x3F,
            WordLength::Seven => 0x7F,
            WordLength::Eight => 0xFF,
        }
    }
}

/// Stop bit count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    /// 1 stop bit
    #[default]
    One,
    /// 1.5 stop bits (5-bit words only)
    OneAndHalf,
    /// 2 stop bits
    Two,
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
    /// Parity bit forced to 1
    Mark,
    /// Parity bit forced to 0
    Space,
}

/// RX FIFO trigger level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxTrigger {
    /// Interrupt on 1 byte
    One,
    /// Interrupt on 4 bytes
    Four,
    /// Interrupt on 8 bytes
    #[default]
    Eight,
    /// Interrupt on 14 bytes
    Fourteen,
}

impl RxTrigger {
    /// FCR trigger field value
    #[must_use]
    pub const fn to_fcr(self) -> u8 {
        match self {
            RxTrigger::One => fcr::TRIGGER_1,
            RxTrigger::Four => fcr::TRIGGER_4,
            RxTrigger::Eight => fcr::TRIGGER_8,
            RxTrigger::Fourteen => fcr::TRIGGER_14,
        }
    }

    /// Trigger depth in bytes
    #[must_use]
    pub const fn bytes(self) -> u8 {
        match self {
            RxTrigger::One => 1,
            RxTrigger::Four => 4,
            RxTrigger::Eight => 8,
            RxTrigger::Fourteen => 14,
        }
    }
}

/// Line parameters: baud rate and framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineConfig {
    /// Baud rate in bits per second
    pub baud: u32,
    /// Data bits per character
    pub word_length: WordLength,
    /// Stop bits per character
    pub stop_bits: StopBits,
    /// Parity mode
    pub parity: Parity,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud: 9600,
            word_length: WordLength::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

impl LineConfig {
    /// Approximate duration of one character frame in milliseconds,
    /// rounded up. Used for the transmit-toggle RTS lowering delay.
    #[must_use]
    pub fn char_time_millis(&self) -> u64 {
        // start bit + data bits + optional parity + stop bits (round 1.5 up)
        let mut bits = 1 + u32::from(self.word_length.bits());
        if self.parity != Parity::None {
            bits += 1;
        }
        bits += match self.stop_bits {
            StopBits::One => 1,
            StopBits::OneAndHalf | StopBits::Two => 2,
        };
        let baud = self.baud.max(1);
        u64::from((bits * 1000).div_ceil(baud).max(1))
    }
}

/// FIFO configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoConfig {
    /// Enable the hardware FIFOs
    pub enabled: bool,
    /// RX trigger level
    pub rx_trigger: RxTrigger,
    /// Bytes fed to the TX FIFO per transmit-empty interrupt
    pub tx_fifo_depth: u8,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rx_trigger: DEFAULT_RX_TRIGGER,
            tx_fifo_depth: DEFAULT_TX_FIFO_DEPTH,
        }
    }
}

/// DTR line behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DtrMode {
    /// DTR held low
    #[default]
    Disabled,
    /// DTR held high
    Enabled,
    /// DTR lowered when the ring crosses the xoff limit, re-raised at the
    /// xon limit
    Handshake,
}

/// RTS line behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtsMode {
    /// RTS held low
    #[default]
    Disabled,
    /// RTS held high
    Enabled,
    /// RTS lowered when the ring crosses the xoff limit, re-raised at the
    /// xon limit
    Handshake,
    /// RTS raised only while transmission is active (half-duplex links)
    TransmitToggle,
}

/// Flow control and handshake settings
///
/// `xoff_limit` counts bytes of *remaining space*: backpressure asserts
/// when `ring count >= capacity - xoff_limit`. `xon_limit` is an absolute
/// count: backpressure releases when `ring count <= xon_limit`. Zero limits
/// mean "derive defaults from the ring capacity" (capacity/8 and
/// capacity/2 respectively), which is also what a ring resize re-derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandFlow {
    /// DTR line mode
    pub dtr: DtrMode,
    /// RTS line mode
    pub rts: RtsMode,
    /// Emit XOFF/XON on ring threshold crossings
    pub auto_receive: bool,
    /// Pause transmission on received XOFF, resume on XON
    pub auto_transmit: bool,
    /// Discard received bytes while DSR is low
    pub dsr_sensitivity: bool,
    /// Abort in-flight reads and writes on a line error
    pub abort_on_error: bool,
    /// Hold transmission while CTS is low
    pub cts_handshake: bool,
    /// Hold transmission while DSR is low
    pub dsr_handshake: bool,
    /// Hold transmission while DCD is low
    pub dcd_handshake: bool,
    /// Free-space threshold that asserts RX backpressure (0 = derive)
    pub xoff_limit: usize,
    /// Fill threshold that releases RX backpressure (0 = derive)
    pub xon_limit: usize,
}

impl HandFlow {
    /// True when any of the output handshake lines is enabled.
    #[must_use]
    pub const fn any_output_handshake(&self) -> bool {
        self.cts_handshake || self.dsr_handshake || self.dcd_handshake
    }

    /// Resolve zero limits to the capacity-derived defaults.
    pub(crate) fn derive_limits(&mut self, capacity: usize) {
        if self.xoff_limit == 0 {
            self.xoff_limit = capacity / 8;
        }
        if self.xon_limit == 0 {
            self.xon_limit = capacity / 2;
        }
    }
}

/// Special characters and replacement policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpecialChars {
    /// Resumes transmission (and is emitted to resume the peer)
    pub xon: u8,
    /// Pauses transmission (and is emitted to pause the peer)
    pub xoff: u8,
    /// Substituted for bytes received with a line error
    pub error: u8,
    /// Generates an end-of-file event when seen
    pub eof: u8,
    /// Generates a flag event when seen
    pub event: u8,
    /// Substituted for a break indication
    pub break_char: u8,
    /// Enable error-character substitution
    pub error_replace: bool,
    /// Enable break-character substitution
    pub break_replace: bool,
    /// Discard received NUL bytes
    pub strip_null: bool,
}

impl Default for SpecialChars {
    fn default() -> Self {
        Self {
            xon: 0x11,  // DC1
            xoff: 0x13, // DC3
            error: 0,
            eof: 0,
            event: 0,
            break_char: 0,
            error_replace: false,
            break_replace: false,
            strip_null: false,
        }
    }
}

/// Read and write timeouts in milliseconds
///
/// A `read_interval` of `u32::MAX` selects return-quickly semantics:
/// return whatever is buffered, using the totals (when not also `MAX`)
/// only as a tail wait for the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeouts {
    /// Maximum gap between received bytes
    pub read_interval: u32,
    /// Per-requested-byte component of the read deadline
    pub read_total_multiplier: u32,
    /// Fixed component of the read deadline
    pub read_total_constant: u32,
    /// Per-byte component of the write deadline
    pub write_total_multiplier: u32,
    /// Fixed component of the write deadline
    pub write_total_constant: u32,
}

/// Port configuration
///
/// # Example
/// ```ignore
/// let config = PortConfig::new()
///     .with_baud(115_200)
///     .with_ring_capacity(4096)
///     .with_handflow(HandFlow {
///         rts: RtsMode::Handshake,
///         ..HandFlow::default()
///     });
/// port.init(config)?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortConfig {
    /// Baud rate and framing
    pub line: LineConfig,
    /// FIFO setup
    pub fifo: FifoConfig,
    /// Flow control
    pub handflow: HandFlow,
    /// Special characters
    pub chars: SpecialChars,
    /// Read/write timeouts
    pub timeouts: Timeouts,
    /// UART input clock in Hz
    pub clock_hz: u32,
    /// Initial RX ring capacity in bytes
    pub ring_capacity: usize,
}

impl PortConfig {
    /// Create a configuration with conventional defaults (9600 8N1,
    /// FIFOs on, no flow control, 1 KiB ring).
    #[must_use]
    pub fn new() -> Self {
        Self {
            line: LineConfig::default(),
            fifo: FifoConfig::default(),
            handflow: HandFlow::default(),
            chars: SpecialChars::default(),
            timeouts: Timeouts::default(),
            clock_hz: DEFAULT_CLOCK_HZ,
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }

    /// Set the baud rate
    #[must_use]
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.line.baud = baud;
        self
    }

    /// Set the full line configuration
    #[must_use]
    pub fn with_line(mut self, line: LineConfig) -> Self {
        self.line = line;
        self
    }

    /// Set the FIFO configuration
    #[must_use]
    pub fn with_fifo(mut self, fifo: FifoConfig) -> Self {
        self.fifo = fifo;
        self
    }

    /// Set the flow control configuration
    #[must_use]
    pub fn with_handflow(mut self, handflow: HandFlow) -> Self {
        self.handflow = handflow;
        self
    }

    /// Set the special characters
    #[must_use]
    pub fn with_chars(mut self, chars: SpecialChars) -> Self {
        self.chars = chars;
        self
    }

    /// Set the timeouts
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the UART input clock
    #[must_use]
    pub fn with_clock_hz(mut self, clock_hz: u32) -> Self {
        self.clock_hz = clock_hz;
        self
    }

    /// Set the initial RX ring capacity
    #[must_use]
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Port lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Created but not yet initialized
    #[default]
    Uninitialized,
    /// Initialized and processing requests
    Running,
    /// Hardware vanished; all requests fail until re-open
    Gone,
}

// =============================================================================
// Error Word Bits
// =============================================================================

/// Accumulated line-error bits, reported and cleared by
/// [`comm_status`](crate::Port::comm_status)
pub mod comm_error {
    /// The RX ring overflowed
    pub const QUEUE_OVERRUN: u32 = 0x0001;
    /// The hardware receive buffer overran
    pub const OVERRUN: u32 = 0x0002;
    /// A byte was received with bad parity
    pub const PARITY: u32 = 0x0004;
    /// A byte was received with a framing error
    pub const FRAMING: u32 = 0x0008;
    /// A break condition was seen on the line
    pub const BREAK: u32 = 0x0010;
}

// =============================================================================
// Status & Statistics
// =============================================================================

/// Snapshot of the port's transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommStatus {
    /// Accumulated [`comm_error`] bits (cleared by the query)
    pub errors: u32,
    /// Reasons transmission is held, see [`txhold`](crate::driver::flow::txhold)
    pub tx_holds: u8,
    /// Reasons reception is held, see [`rxhold`](crate::driver::flow::rxhold)
    pub rx_holds: u8,
    /// Bytes buffered for reading (ring plus donated-buffer fill)
    pub in_queue: usize,
    /// Bytes not yet transmitted for the current and queued writes
    pub out_queue: usize,
    /// An EOF character was delivered
    pub eof_received: bool,
    /// An immediate character is waiting to transmit
    pub wait_for_immediate: bool,
}

/// Transfer statistics, cleared by [`clear_stats`](crate::Port::clear_stats)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    /// Bytes received
    pub received: u32,
    /// Bytes transmitted
    pub transmitted: u32,
    /// Framing errors seen
    pub frame_errors: u32,
    /// Hardware receive overruns
    pub serial_overruns: u32,
    /// RX ring overruns
    pub buffer_overruns: u32,
    /// Parity errors seen
    pub parity_errors: u32,
}

/// Static capabilities of the port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CommProperties {
    /// Highest configurable baud rate
    pub max_baud: u32,
    /// Current RX ring capacity
    pub rx_queue_size: usize,
    /// Hardware RX FIFO depth
    pub rx_fifo_depth: u8,
    /// Hardware TX FIFO depth
    pub tx_fifo_depth: u8,
    /// DTR/DSR handshake supported
    pub supports_dtr_dsr: bool,
    /// RTS/CTS handshake supported
    pub supports_rts_cts: bool,
    /// XON/XOFF flow control supported
    pub supports_xon_xoff: bool,
    /// Event waits supported
    pub supports_wait_mask: bool,
    /// Total and interval timeouts supported
    pub supports_timeouts: bool,
}

// =============================================================================
// Unit Tests
// =============================================================================
