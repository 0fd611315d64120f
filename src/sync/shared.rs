//! ISR-safe port wrapper using critical sections.

use super::primitives::CriticalSectionCell;
use crate::driver::isr::IsrSummary;
use crate::driver::port::Port;
use crate::driver::request::Completion;
use crate::hal::uart::UartDevice;
use crate::internal::timer::Instant;

/// ISR-safe port wrapper using critical sections.
///
/// All access goes through `critical_section::with()`, disabling
/// interrupts for the duration of the closure. That closure *is* the
/// engine's interrupt-synchronize primitive: any dispatch-side sequence
/// run through [`with`](Self::with) is atomic with respect to
/// [`service_interrupt`](Self::service_interrupt).
///
/// # Example
///
/// ```ignore
/// static PORT: StaticCell<SharedPort<MyUart>> = StaticCell::new();
/// let port = PORT.init(SharedPort::new(Port::new(uart)));
///
/// // thread context
/// port.with(|p| p.write(now, b"hi"))?;
///
/// // interrupt handler
/// port.service_interrupt();
/// ```
pub struct SharedPort<U: UartDevice> {
    inner: CriticalSectionCell<Port<U>>,
}

impl<U: UartDevice> SharedPort<U> {
    /// Wrap a port for cross-context sharing.
    pub fn new(port: Port<U>) -> Self {
        Self {
            inner: CriticalSectionCell::new(port),
        }
    }

    /// Execute a closure with exclusive access to the port.
    ///
    /// Interrupts are disabled for the duration of the closure.
    #[inline]
    pub fn with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Port<U>) -> R,
    {
        self.inner.with(f)
    }

    /// Try to execute a closure, returning `None` if already borrowed.
    #[inline]
    pub fn try_with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Port<U>) -> R,
    {
        self.inner.try_with(f)
    }

    /// Service the UART interrupt. Call from the interrupt handler.
    #[inline]
    pub fn service_interrupt(&self) -> IsrSummary {
        self.inner.with(|port| port.handle_interrupt())
    }

    /// Run deferred work and expired timers. Call from thread or timer
    /// context with the current time; returns the next deadline.
    #[inline]
    pub fn service_poll(&self, now: Instant) -> Option<Instant> {
        self.inner.with(|port| port.poll(now))
    }

    /// Take the oldest pending completion.
    #[inline]
    pub fn take_completion(&self) -> Option<Completion> {
        self.inner.with(|port| port.take_completion())
    }
}

// SAFETY: all access to the inner Port is serialized by critical sections.
unsafe impl<U: UartDevice + Send> Send for SharedPort<U> {}
// SAFETY: all access to the inner Port is serialized by critical sections.
unsafe impl<U: UartDevice + Send> Sync for SharedPort<U> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::config::State;
    use crate::testing::MockUart;

    fn shared() -> SharedPort<MockUart> {
        let (dev, _wire) = MockUart::new();
        SharedPort::new(Port::new(dev))
    }

    #[test]
    fn shared_port_with_returns_value() {
        let port = shared();
        let result = port.with(|_p| 42);
        assert_eq!(result, 42);
    }

    #[test]
    fn shared_port_with_can_read_state() {
        let port = shared();
        let state = port.with(|p| p.state());
        assert_eq!(state, State::Uninitialized);
    }

    #[test]
    fn shared_port_try_with_returns_some() {
        let port = shared();
        assert_eq!(port.try_with(|_p| 123), Some(123));
    }

    #[test]
    fn shared_port_multiple_with_calls() {
        let port = shared();
        let r1 = port.with(|_p| 1);
        let r2 = port.with(|_p| 2);
        assert_eq!((r1, r2), (1, 2));
    }

    #[test]
    fn shared_port_interrupt_on_uninitialized_is_inert() {
        let port = shared();
        let summary = port.service_interrupt();
        assert!(!summary.serviced);
        assert!(!summary.deferred_pending);
    }

    #[test]
    fn shared_port_take_completion_empty() {
        let port = shared();
        assert!(port.take_completion().is_none());
    }
}
