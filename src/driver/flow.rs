//! Flow control for the serial port engine.
//!
//! This module extends [`Port`] with the modem/flow-control state machine:
//! DTR/RTS handshake thresholds over the RX ring, XON/XOFF emission and
//! honoring, output handshake against the modem status lines, break
//! control, and the transmit-toggle RTS lowering sequence.
//!
//! # Overview
//!
//! Reception backpressure works on ring occupancy with hysteresis:
//!
//! 1. When the ring reaches `capacity - xoff_limit`, lower DTR/RTS and/or
//!    emit XOFF, recording the reason in [`rxhold`] bits.
//! 2. When a read drains the ring to `xon_limit`, release each held
//!    reason (raise the line, emit XON).
//!
//! Transmission holds are tracked in [`txhold`] bits fed by modem status
//! transitions, received XOFF characters, and break state. The transmit
//! path sends nothing while any bit is set.

use super::config::{DtrMode, HandFlow, RtsMode};
use super::port::{Dpc, Port};
use crate::hal::uart::{UartDevice, UartRegister, lcr, lsr, mcr, msr};
use crate::driver::error::{ConfigError, Result};
use crate::driver::wait::event;

// =============================================================================
// Holding Reasons
// =============================================================================

/// Reasons transmission is held (bits in [`CommStatus::tx_holds`](crate::CommStatus::tx_holds))
pub mod txhold {
    /// CTS is low with CTS handshake enabled
    pub const CTS: u8 = 0x01;
    /// DSR is low with DSR handshake enabled
    pub const DSR: u8 = 0x02;
    /// DCD is low with DCD handshake enabled
    pub const DCD: u8 = 0x04;
    /// An XOFF was received (or faked) and not yet released
    pub const XOFF: u8 = 0x08;
    /// Break is being transmitted
    pub const BREAK: u8 = 0x10;
}

/// Reasons reception is held (bits in [`CommStatus::rx_holds`](crate::CommStatus::rx_holds))
pub mod rxhold {
    /// DTR was lowered by handshake
    pub const DTR: u8 = 0x01;
    /// An XOFF was emitted and no XON has followed
    pub const XOFF: u8 = 0x02;
    /// RTS was lowered by handshake
    pub const RTS: u8 = 0x04;
    /// DSR is low with DSR sensitivity enabled
    pub const DSR: u8 = 0x08;
}

// =============================================================================
// Flow Control Implementation
// =============================================================================

impl<U: UartDevice> Port<U> {
    // =========================================================================
    // Modem Control Lines
    // =========================================================================

    pub(super) fn raise_dtr(&mut self) {
        let mc = self.dev.read(UartRegister::ModemControl);
        self.dev.write(UartRegister::ModemControl, mc | mcr::DTR);
    }

    pub(super) fn lower_dtr(&mut self) {
        let mc = self.dev.read(UartRegister::ModemControl);
        self.dev.write(UartRegister::ModemControl, mc & !mcr::DTR);
    }

    pub(super) fn raise_rts(&mut self) {
        let mc = self.dev.read(UartRegister::ModemControl);
        self.dev.write(UartRegister::ModemControl, mc | mcr::RTS);
    }

    pub(super) fn lower_rts(&mut self) {
        let mc = self.dev.read(UartRegister::ModemControl);
        self.dev.write(UartRegister::ModemControl, mc & !mcr::RTS);
    }

    /// Raise DTR manually.
    ///
    /// # Errors
    /// - `InvalidHandshake` - DTR is owned by the handshake state machine
    pub fn set_dtr(&mut self) -> Result<()> {
        if self.config.handflow.dtr == DtrMode::Handshake {
            return Err(ConfigError::InvalidHandshake.into());
        }
        self.raise_dtr();
        Ok(())
    }

    /// Lower DTR manually.
    ///
    /// # Errors
    /// - `InvalidHandshake` - DTR is owned by the handshake state machine
    pub fn clear_dtr(&mut self) -> Result<()> {
        if self.config.handflow.dtr == DtrMode::Handshake {
            return Err(ConfigError::InvalidHandshake.into());
        }
        self.lower_dtr();
        Ok(())
    }

    /// Raise RTS manually.
    ///
    /// # Errors
    /// - `InvalidHandshake` - RTS is owned by handshake or transmit toggle
    pub fn set_rts(&mut self) -> Result<()> {
        if matches!(
            self.config.handflow.rts,
            RtsMode::Handshake | RtsMode::TransmitToggle
        ) {
            return Err(ConfigError::InvalidHandshake.into());
        }
        self.raise_rts();
        Ok(())
    }

    /// Lower RTS manually.
    ///
    /// # Errors
    /// - `InvalidHandshake` - RTS is owned by handshake or transmit toggle
    pub fn clear_rts(&mut self) -> Result<()> {
        if matches!(
            self.config.handflow.rts,
            RtsMode::Handshake | RtsMode::TransmitToggle
        ) {
            return Err(ConfigError::InvalidHandshake.into());
        }
        self.lower_rts();
        Ok(())
    }

    // =========================================================================
    // HandFlow Installation
    // =========================================================================

    /// Get the active flow control configuration
    #[inline(always)]
    pub fn handflow(&self) -> &HandFlow {
        &self.config.handflow
    }

    /// Install new flow control settings.
    ///
    /// Line levels and holding reasons are reconciled with the new policy
    /// immediately: enabling a handshake above threshold asserts it, and
    /// disabling one releases any hold it latched.
    ///
    /// # Errors
    /// - `InvalidHandshake` - limits exceed the ring, or DTR handshake is
    ///   combined with DSR sensitivity
    pub fn set_handflow(&mut self, new: HandFlow) -> Result<()> {
        let mut new = new;
        new.derive_limits(self.ring.capacity());

        if new.xoff_limit > self.ring.capacity() || new.xon_limit > self.ring.capacity() {
            return Err(ConfigError::InvalidHandshake.into());
        }
        if new.dtr == DtrMode::Handshake && new.dsr_sensitivity {
            return Err(ConfigError::InvalidHandshake.into());
        }

        self.setup_new_handflow(new);
        // Output-handshake holds key off the live modem status; rerunning
        // the update applies (or releases) them under the new policy.
        self.handle_modem_update(false);
        Ok(())
    }

    /// Reconcile line state with `new` and store it.
    ///
    /// Mirrors of this logic run on init (where every section applies
    /// because nothing was configured before).
    pub(super) fn setup_new_handflow(&mut self, new: HandFlow) {
        let first_time = !self.handflow_installed;
        let old = self.config.handflow;

        // DTR policy
        if first_time || old.dtr != new.dtr {
            match new.dtr {
                DtrMode::Handshake => {
                    if self.ring.capacity() - new.xoff_limit > self.ring.count() {
                        // Below threshold. When already holding, only release
                        // once the ring has drained past the xon limit.
                        if self.rx_holding & rxhold::DTR != 0 {
                            if self.ring.count() <= new.xon_limit {
                                self.rx_holding &= !rxhold::DTR;
                                self.raise_dtr();
                            }
                        } else {
                            self.raise_dtr();
                        }
                    } else {
                        self.rx_holding |= rxhold::DTR;
                        self.lower_dtr();
                    }
                }
                DtrMode::Enabled => {
                    self.rx_holding &= !rxhold::DTR;
                    self.raise_dtr();
                }
                DtrMode::Disabled => {
                    self.rx_holding &= !rxhold::DTR;
                    self.lower_dtr();
                }
            }
        }

        // RTS policy
        if first_time || old.rts != new.rts {
            match new.rts {
                RtsMode::Handshake => {
                    if self.ring.capacity() - new.xoff_limit > self.ring.count() {
                        if self.rx_holding & rxhold::RTS != 0 {
                            if self.ring.count() <= new.xon_limit {
                                self.rx_holding &= !rxhold::RTS;
                                self.raise_rts();
                            }
                        } else {
                            self.raise_rts();
                        }
                    } else {
                        self.rx_holding |= rxhold::RTS;
                        self.lower_rts();
                    }
                }
                RtsMode::Enabled => {
                    self.rx_holding &= !rxhold::RTS;
                    self.raise_rts();
                }
                RtsMode::TransmitToggle => {
                    self.rx_holding &= !rxhold::RTS;

                    // Store the mode now: the lowering path re-checks it,
                    // possibly from a later timer fire.
                    self.config.handflow.rts = RtsMode::TransmitToggle;

                    // Break, bytes still in the hardware, or runnable write
                    // work all keep RTS up; otherwise begin the lowering
                    // sequence.
                    let lsr_now = self.process_lsr();
                    let hw_busy = lsr_now & (lsr::THRE | lsr::TEMT) != (lsr::THRE | lsr::TEMT);
                    if self.tx_holding & txhold::BREAK != 0
                        || hw_busy
                        || self.has_runnable_tx_work()
                    {
                        self.raise_rts();
                    } else {
                        self.rts_lower_count += 1;
                        self.perhaps_lower_rts();
                    }
                }
                RtsMode::Disabled => {
                    self.rx_holding &= !rxhold::RTS;
                    self.lower_rts();
                }
            }
        }

        // Automatic receive (XON/XOFF emission)
        if first_time || old.auto_receive != new.auto_receive {
            if new.auto_receive {
                // OS/2 rule: never send an unsolicited XON here; only latch
                // an XOFF if we are already past the threshold.
                if self.ring.capacity() - new.xoff_limit <= self.ring.count() {
                    self.rx_holding |= rxhold::XOFF;
                    self.prod_xon_xoff(false);
                }
            } else if self.rx_holding & rxhold::XOFF != 0 {
                self.rx_holding &= !rxhold::XOFF;
                self.prod_xon_xoff(true);
            }
        }

        // Automatic transmit (received XON/XOFF honoring)
        if (first_time || old.auto_transmit != new.auto_transmit)
            && !new.auto_transmit
            && self.tx_holding & txhold::XOFF != 0
        {
            self.tx_holding &= !txhold::XOFF;
            self.prod_xon_xoff(true);
        }

        self.config.handflow = new;
        self.handflow_installed = true;
    }

    // =========================================================================
    // XON / XOFF Emission
    // =========================================================================

    /// Queue an XON or XOFF character for transmission.
    ///
    /// The character rides ahead of user data in the transmit path; if the
    /// holding register is idle this forces a transmit interrupt to carry
    /// it out.
    pub(super) fn prod_xon_xoff(&mut self, send_xon: bool) {
        if !self.send_xon && !self.send_xoff && self.holding_empty {
            self.kick_transmit();
        }

        if send_xon {
            self.send_xon = true;
            self.send_xoff = false;
        } else {
            self.send_xon = false;
            self.send_xoff = true;
        }
    }

    /// React to the ring draining: release any holds once the count falls
    /// to the xon limit.
    pub(super) fn handle_reduced_ring(&mut self) {
        if self.rx_holding == 0 {
            return;
        }
        if self.ring.count() > self.config.handflow.xon_limit {
            return;
        }

        if self.rx_holding & rxhold::DTR != 0 {
            self.rx_holding &= !rxhold::DTR;
            self.raise_dtr();
        }
        if self.rx_holding & rxhold::RTS != 0 {
            self.rx_holding &= !rxhold::RTS;
            self.raise_rts();
        }
        if self.rx_holding & rxhold::XOFF != 0 {
            // The hold bit clears when the XON actually leaves the wire.
            self.prod_xon_xoff(true);
        }
    }

    /// React to the ring filling: assert backpressure at the xoff limit
    /// and note the nearly-full event.
    pub(super) fn handle_grown_ring(&mut self) {
        let count = self.ring.count();
        let hf = self.config.handflow;
        let threshold_hit = count >= self.ring.capacity() - hf.xoff_limit;

        if threshold_hit {
            if hf.auto_receive && self.rx_holding & rxhold::XOFF == 0 {
                self.rx_holding |= rxhold::XOFF;
                self.prod_xon_xoff(false);
            }
            if hf.dtr == DtrMode::Handshake && self.rx_holding & rxhold::DTR == 0 {
                self.rx_holding |= rxhold::DTR;
                self.lower_dtr();
            }
            if hf.rts == RtsMode::Handshake && self.rx_holding & rxhold::RTS == 0 {
                self.rx_holding |= rxhold::RTS;
                self.lower_rts();
            }
        }

        if count >= self.nearly_full {
            self.note_event(event::RX80FULL);
        }
    }

    // =========================================================================
    // Pretend XON / XOFF
    // =========================================================================

    /// Act as if an XOFF had been received: hold transmission.
    ///
    /// This holds regardless of the auto-transmit setting; without
    /// auto-transmit, only [`set_xon`](Self::set_xon) can release it.
    pub fn set_xoff(&mut self) {
        self.tx_holding |= txhold::XOFF;

        if self.config.handflow.rts == RtsMode::TransmitToggle {
            self.rts_lower_count += 1;
            self.deferred.push_back(Dpc::StartTimerLowerRts);
        }
    }

    /// Act as if an XON had been received: release an XOFF hold.
    pub fn set_xon(&mut self) {
        if self.tx_holding != 0 {
            // Only poke the hardware when the release actually unblocks
            // transmission; a spurious kick could overwrite a byte already
            // in the holding register.
            self.tx_holding &= !txhold::XOFF;

            if self.tx_holding == 0 && self.has_tx_bytes_pending() && self.holding_empty {
                self.kick_transmit();
            }
        }
    }

    // =========================================================================
    // Break Control
    // =========================================================================

    /// Start transmitting a break and hold user data.
    pub fn set_break_on(&mut self) {
        if self.config.handflow.rts == RtsMode::TransmitToggle {
            self.raise_rts();
        }

        let lc = self.dev.read(UartRegister::LineControl);
        self.dev.write(UartRegister::LineControl, lc | lcr::BREAK);
        self.tx_holding |= txhold::BREAK;
    }

    /// Stop transmitting a break and restart transmission if possible.
    pub fn set_break_off(&mut self) {
        if self.tx_holding & txhold::BREAK == 0 {
            return;
        }

        let lc = self.dev.read(UartRegister::LineControl);
        self.dev.write(UartRegister::LineControl, lc & !lcr::BREAK);
        self.tx_holding &= !txhold::BREAK;

        if self.tx_holding == 0 && self.has_tx_bytes_pending() && self.holding_empty {
            self.kick_transmit();
        } else {
            self.rts_lower_count += 1;
            self.perhaps_lower_rts();
        }
    }

    // =========================================================================
    // Modem Status
    // =========================================================================

    /// Read the modem status register and fan out every consequence:
    /// escape insertion, DSR sensitivity, wait events, output handshake
    /// holds, and transmit restart.
    ///
    /// `doing_tx` suppresses the restart kick when the caller is the
    /// transmit path itself and will send the next byte anyway.
    pub(super) fn handle_modem_update(&mut self, doing_tx: bool) -> u8 {
        let old_holding = self.tx_holding;
        let modem_status = self.dev.read(UartRegister::ModemStatus);

        if self.escape_char != 0 && modem_status & msr::DELTA_BITS != 0 {
            self.insert_escape_triple(super::isr::lsrmst::MST, modem_status);
        }

        // DSR sensitivity gates reception, not transmission.
        if self.config.handflow.dsr_sensitivity {
            if modem_status & msr::DSR != 0 {
                self.rx_holding &= !rxhold::DSR;
            } else {
                self.rx_holding |= rxhold::DSR;
            }
        } else {
            self.rx_holding &= !rxhold::DSR;
        }

        if self.isr_wait_mask != 0 {
            if modem_status & msr::DCTS != 0 {
                self.note_event(event::CTS);
            }
            if modem_status & msr::DDSR != 0 {
                self.note_event(event::DSR);
            }
            if modem_status & msr::TERI != 0 {
                self.note_event(event::RING);
            }
            if modem_status & msr::DDCD != 0 {
                self.note_event(event::RLSD);
            }
        }

        let hf = self.config.handflow;
        if hf.any_output_handshake() {
            if hf.cts_handshake {
                if modem_status & msr::CTS != 0 {
                    self.tx_holding &= !txhold::CTS;
                } else {
                    self.tx_holding |= txhold::CTS;
                }
            } else {
                self.tx_holding &= !txhold::CTS;
            }

            if hf.dsr_handshake {
                if modem_status & msr::DSR != 0 {
                    self.tx_holding &= !txhold::DSR;
                } else {
                    self.tx_holding |= txhold::DSR;
                }
            } else {
                self.tx_holding &= !txhold::DSR;
            }

            if hf.dcd_handshake {
                if modem_status & msr::DCD != 0 {
                    self.tx_holding &= !txhold::DCD;
                } else {
                    self.tx_holding |= txhold::DCD;
                }
            } else {
                self.tx_holding &= !txhold::DCD;
            }

            if old_holding == 0
                && self.tx_holding != 0
                && hf.rts == RtsMode::TransmitToggle
            {
                self.rts_lower_count += 1;
                self.deferred.push_back(Dpc::StartTimerLowerRts);
            }

            if !doing_tx && old_holding != 0 && self.tx_holding == 0 {
                self.restart_tx_if_work_pending();
            }
        } else if self.tx_holding & (txhold::CTS | txhold::DSR | txhold::DCD) != 0 {
            // Output handshake just got disabled; any line-based holds
            // evaporate with it.
            self.tx_holding &= !(txhold::CTS | txhold::DSR | txhold::DCD);

            if !doing_tx && old_holding != 0 && self.tx_holding == 0 {
                self.restart_tx_if_work_pending();
            }
        }

        modem_status
    }

    fn restart_tx_if_work_pending(&mut self) {
        if self.tx_holding == 0 && self.has_tx_bytes_pending() && self.holding_empty {
            self.kick_transmit();
        }
    }

    // =========================================================================
    // Transmit Toggle (RTS)
    // =========================================================================

    /// Lower RTS if transmit toggle is on and nothing is, or will be,
    /// transmitting; otherwise schedule a retry one character-time out.
    ///
    /// `rts_lower_count` tracks how many lowering paths are in flight so
    /// that an abandoned path does not leave the sequence dangling.
    pub(super) fn perhaps_lower_rts(&mut self) {
        if self.config.handflow.rts == RtsMode::TransmitToggle {
            if self.tx_holding & txhold::BREAK != 0 || self.has_runnable_tx_work() {
                // Whoever finishes that work will re-invoke the sequence.
            } else if self.process_lsr() & (lsr::THRE | lsr::TEMT)
                != (lsr::THRE | lsr::TEMT)
            {
                // Bytes still shifting out; try again later.
                self.rts_lower_count += 1;
                self.deferred.push_back(Dpc::StartTimerLowerRts);
            } else {
                self.lower_rts();
            }
        }

        self.rts_lower_count = self.rts_lower_count.saturating_sub(1);
    }

    /// Deferred half of the lowering sequence: arm the one-character
    /// delay. Re-arming an already armed timer means a concurrent path
    /// died, so the counter is dropped to match.
    pub(super) fn start_timer_lower_rts(&mut self, now: crate::Instant) {
        let char_time = crate::Duration::from_millis(self.config.line.char_time_millis());
        if self
            .timers
            .arm(crate::internal::timer::TimerId::LowerRts, now.plus(char_time))
        {
            self.rts_lower_count = self.rts_lower_count.saturating_sub(1);
        }
    }

    /// Pending write work that is actually allowed to run.
    fn has_runnable_tx_work(&self) -> bool {
        self.write_slot.current.is_some()
            || self.transmit_immediate
            || (!self.write_slot.queue.is_empty() && self.tx_holding == 0)
    }

    /// Bytes the transmit interrupt would emit right now if unblocked.
    pub(super) fn has_tx_bytes_pending(&self) -> bool {
        self.transmit_immediate || self.write_remaining > 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
