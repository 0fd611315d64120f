//! Millisecond time base and the port's named one-shot timers.
//!
//! The engine never reads a clock of its own. Callers stamp every
//! submission and every [`poll`](crate::Port::poll) with an [`Instant`];
//! expired timers are delivered as deferred callbacks from `poll`, never
//! from interrupt context.

// =============================================================================
// Time Base
// =============================================================================

/// A point in time, in milliseconds from an arbitrary epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Instant {
    millis: u64,
}

impl Instant {
    /// The epoch itself.
    pub const ZERO: Instant = Instant { millis: 0 };

    /// Construct from a millisecond count.
    #[inline(always)]
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Milliseconds since the epoch.
    #[inline(always)]
    pub const fn millis(self) -> u64 {
        self.millis
    }

    /// This instant advanced by a duration (saturating).
    #[inline]
    pub const fn plus(self, d: Duration) -> Self {
        Self {
            millis: self.millis.saturating_add(d.millis),
        }
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    #[inline]
    pub const fn since(self, earlier: Instant) -> Duration {
        Duration {
            millis: self.millis.saturating_sub(earlier.millis),
        }
    }
}

/// A span of time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Duration {
    millis: u64,
}

impl Duration {
    /// The zero-length span.
    pub const ZERO: Duration = Duration { millis: 0 };

    /// Construct from a millisecond count.
    #[inline(always)]
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Length in milliseconds.
    #[inline(always)]
    pub const fn millis(self) -> u64 {
        self.millis
    }
}

// =============================================================================
// Named Timers
// =============================================================================

/// The port's named one-shot timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TimerId {
    /// Total timeout for the current read
    ReadTotal,
    /// Inter-byte timeout for the current read
    ReadInterval,
    /// Total timeout for the current write
    WriteTotal,
    /// Total timeout for the current immediate character
    ImmediateTotal,
    /// Countdown timeout for the current xoff counter
    XoffCount,
    /// Transmit-toggle RTS lowering delay
    LowerRts,
}

impl TimerId {
    pub(crate) const COUNT: usize = 6;

    const ALL: [TimerId; Self::COUNT] = [
        TimerId::ReadTotal,
        TimerId::ReadInterval,
        TimerId::WriteTotal,
        TimerId::ImmediateTotal,
        TimerId::XoffCount,
        TimerId::LowerRts,
    ];

    #[inline(always)]
    const fn index(self) -> usize {
        match self {
            TimerId::ReadTotal => 0,
            TimerId::ReadInterval => 1,
            TimerId::WriteTotal => 2,
            TimerId::ImmediateTotal => 3,
            TimerId::XoffCount => 4,
            TimerId::LowerRts => 5,
        }
    }
}

/// One deadline slot per named timer.
///
/// Arming an armed timer re-arms it without firing; cancelling reports
/// whether a pending fire was actually prevented, which is what lets timer
/// owners know their reference was released.
pub(crate) struct TimerSet {
    deadlines: [Option<Instant>; TimerId::COUNT],
}

impl TimerSet {
    pub(crate) const fn new() -> Self {
        Self {
            deadlines: [None; TimerId::COUNT],
        }
    }

    /// Arm `timer` to fire at `deadline`. Returns whether it was already armed.
    pub(crate) fn arm(&mut self, timer: TimerId, deadline: Instant) -> bool {
        self.deadlines[timer.index()].replace(deadline).is_some()
    }

    /// Cancel `timer`. Returns `true` when a pending fire was prevented.
    pub(crate) fn cancel(&mut self, timer: TimerId) -> bool {
        self.deadlines[timer.index()].take().is_some()
    }

    /// Whether `timer` is currently armed.
    pub(crate) fn is_armed(&self, timer: TimerId) -> bool {
        self.deadlines[timer.index()].is_some()
    }

    /// Take one expired timer, earliest deadline first.
    ///
    /// The caller loops until `None`, invoking the matching deferred
    /// callback for each fire.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<TimerId> {
        let mut best: Option<(TimerId, Instant)> = None;
        for id in TimerId::ALL {
            if let Some(deadline) = self.deadlines[id.index()] {
                if deadline <= now && best.is_none_or(|(_, d)| deadline < d) {
                    best = Some((id, deadline));
                }
            }
        }
        let (id, _) = best?;
        self.deadlines[id.index()] = None;
        Some(id)
    }

    /// The earliest armed deadline, for programming a platform timer.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().copied().min()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Instant = Instant::ZERO;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn instant_arithmetic() {
        let t = at(100).plus(Duration::from_millis(50));
        assert_eq!(t.millis(), 150);
        assert_eq!(t.since(at(100)).millis(), 50);
        assert_eq!(at(10).since(at(20)), Duration::ZERO);
    }

    #[test]
    fn arm_reports_previous_arming() {
        let mut set = TimerSet::new();
        assert!(!set.arm(TimerId::ReadTotal, at(10)));
        assert!(set.arm(TimerId::ReadTotal, at(20)));
        assert!(set.is_armed(TimerId::ReadTotal));
    }

    #[test]
    fn rearm_moves_deadline_without_firing() {
        let mut set = TimerSet::new();
        set.arm(TimerId::ReadTotal, at(10));
        set.arm(TimerId::ReadTotal, at(30));
        assert_eq!(set.pop_expired(at(20)), None);
        assert_eq!(set.pop_expired(at(30)), Some(TimerId::ReadTotal));
    }

    #[test]
    fn cancel_prevents_fire() {
        let mut set = TimerSet::new();
        set.arm(TimerId::WriteTotal, at(10));
        assert!(set.cancel(TimerId::WriteTotal));
        assert!(!set.cancel(TimerId::WriteTotal));
        assert_eq!(set.pop_expired(at(100)), None);
    }

    #[test]
    fn pop_expired_earliest_first() {
        let mut set = TimerSet::new();
        set.arm(TimerId::ReadTotal, at(30));
        set.arm(TimerId::ReadInterval, at(10));
        set.arm(TimerId::LowerRts, at(20));

        assert_eq!(set.pop_expired(at(30)), Some(TimerId::ReadInterval));
        assert_eq!(set.pop_expired(at(30)), Some(TimerId::LowerRts));
        assert_eq!(set.pop_expired(at(30)), Some(TimerId::ReadTotal));
        assert_eq!(set.pop_expired(at(30)), None);
    }

    #[test]
    fn unexpired_timers_stay_armed() {
        let mut set = TimerSet::new();
        set.arm(TimerId::XoffCount, at(500));
        assert_eq!(set.pop_expired(T0), None);
        assert!(set.is_armed(TimerId::XoffCount));
    }

    #[test]
    fn next_deadline_is_minimum() {
        let mut set = TimerSet::new();
        assert_eq!(set.next_deadline(), None);
        set.arm(TimerId::ReadTotal, at(40));
        set.arm(TimerId::ImmediateTotal, at(15));
        assert_eq!(set.next_deadline(), Some(at(15)));
    }
}
