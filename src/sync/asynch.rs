//! Async submission wrappers.
//!
//! [`AsyncSharedPort`] layers futures over the completion queue: submit
//! through the usual engine entry points, then await the matching
//! [`Completion`]. The interrupt handler and poll hook wake pending
//! futures whenever new completions surface.
//!
//! The engine still needs timestamps: the platform keeps calling
//! [`service_poll`](AsyncSharedPort::service_poll) (e.g. from a ticker
//! task) exactly as in the synchronous setup.

use core::future::poll_fn;
use core::task::Poll;

use super::primitives::{AtomicWaker, CriticalSectionCell};
use crate::driver::isr::IsrSummary;
use crate::driver::port::Port;
use crate::driver::request::{Completion, RequestId};
use crate::hal::uart::UartDevice;
use crate::internal::timer::Instant;

/// ISR-safe, async-capable port wrapper.
///
/// # Example
///
/// ```ignore
/// let done = PORT.write(now, b"AT\r\n").await?;
/// assert_eq!(done.bytes_transferred, 4);
/// ```
pub struct AsyncSharedPort<U: UartDevice> {
    inner: CriticalSectionCell<Port<U>>,
    completions: AtomicWaker,
}

impl<U: UartDevice> AsyncSharedPort<U> {
    /// Wrap a port for async use.
    pub fn new(port: Port<U>) -> Self {
        Self {
            inner: CriticalSectionCell::new(port),
            completions: AtomicWaker::new(),
        }
    }

    /// Execute a closure with exclusive access to the port (synchronous).
    #[inline]
    pub fn with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Port<U>) -> R,
    {
        self.inner.with(f)
    }

    /// Service the UART interrupt. Call from the interrupt handler.
    pub fn service_interrupt(&self) -> IsrSummary {
        let summary = self.inner.with(|port| port.handle_interrupt());
        if summary.deferred_pending {
            self.completions.wake();
        }
        summary
    }

    /// Run deferred work and expired timers, waking any futures whose
    /// completions just landed. Returns the next deadline.
    pub fn service_poll(&self, now: Instant) -> Option<Instant> {
        let (deadline, pending) = self
            .inner
            .with(|port| (port.poll(now), port.completions_pending()));
        if pending > 0 {
            self.completions.wake();
        }
        deadline
    }

    /// Await the completion of a previously submitted request.
    pub async fn completion(&self, id: RequestId) -> Completion {
        poll_fn(|cx| {
            let taken = self.inner.with(|port| port.take_completion_of(id));
            match taken {
                Some(completion) => Poll::Ready(completion),
                None => {
                    self.completions.register(cx.waker());
                    Poll::Pending
                }
            }
        })
        .await
    }

    /// Submit a read and await its completion.
    pub async fn read(&self, now: Instant, len: usize) -> crate::Result<Completion> {
        let id = self.inner.with(|port| port.read(now, len))?;
        Ok(self.completion(id).await)
    }

    /// Submit a write and await its completion.
    pub async fn write(&self, now: Instant, data: &[u8]) -> crate::Result<Completion> {
        let id = self.inner.with(|port| port.write(now, data))?;
        Ok(self.completion(id).await)
    }

    /// Arm a wait and await the delivered event mask.
    pub async fn wait_on_mask(&self, _now: Instant) -> crate::Result<Completion> {
        let id = self.inner.with(|port| port.wait_on_mask())?;
        Ok(self.completion(id).await)
    }
}

// SAFETY: all access to the inner Port is serialized by critical sections.
unsafe impl<U: UartDevice + Send> Send for AsyncSharedPort<U> {}
// SAFETY: all access to the inner Port is serialized by critical sections.
unsafe impl<U: UartDevice + Send> Sync for AsyncSharedPort<U> {}

// =============================================================================
// Unit Tests
// =============================================================================
