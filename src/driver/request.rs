//! Request lifecycle: identity, ownership, queuing, and completion.
//!
//! Every pending-capable operation becomes a [`Request`]. While pending, a
//! request is retained by an [`Owners`] bitset naming who may still touch
//! it: the interrupt service routine, the cancel path, and the timers. A
//! request completes exactly once, when the last owner bit clears; the
//! result surfaces as a [`Completion`] on the port's completion queue.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

// =============================================================================
// Identity & Terminals
// =============================================================================

/// Opaque identity of a submitted request, used for cancellation and for
/// matching completions to submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestId(pub(crate) u64);

/// How a request terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompletionStatus {
    /// The request was satisfied
    Success,
    /// The request was cancelled (explicitly or by a purge)
    Cancelled,
    /// The total or interval deadline passed first
    Timeout,
    /// An xoff counter's own deadline passed before its countdown finished
    CounterTimeout,
    /// An xoff counter was aborted by a newly submitted write
    MoreWrites,
    /// A line error aborted the request
    SerialError,
    /// The hardware vanished underneath the request
    NoSuchDevice,
    /// An allocation failed while executing the request
    InsufficientResources,
}

/// What kind of operation a completion reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompletionKind {
    /// A read request
    Read,
    /// A write request
    Write,
    /// A flush request
    Flush,
    /// An xoff counter request
    XoffCounter,
    /// An immediate character request
    Immediate,
    /// An event wait request
    Wait,
    /// A ring resize request
    Resize,
}

/// The delivered result of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Identity of the completed request
    pub id: RequestId,
    /// Operation kind
    pub kind: CompletionKind,
    /// Terminal status
    pub status: CompletionStatus,
    /// Bytes transferred (reads and writes), or zero
    pub bytes_transferred: usize,
    /// Read payload, truncated to `bytes_transferred`
    pub data: Option<Vec<u8>>,
    /// Satisfied event bits for waits
    pub events: u32,
}

// =============================================================================
// Ownership
// =============================================================================

/// Outstanding references that keep a request alive.
///
/// Each holder sets its bit on acquisition and clears it on release; the
/// request completes on the transition to the empty set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Owners(u8);

impl Owners {
    /// The interrupt service routine is feeding or draining this request
    pub(crate) const ISR: u8 = 0x01;
    /// The request is cancelable (its cancel routine is installed)
    pub(crate) const CANCEL: u8 = 0x02;
    /// The total timer is armed against this request
    pub(crate) const TOTAL_TIMER: u8 = 0x04;
    /// The interval timer is armed against this request
    pub(crate) const INTERVAL_TIMER: u8 = 0x08;
    /// A write is busy abandoning this xoff counter
    pub(crate) const XOFF: u8 = 0x10;

    pub(crate) const fn none() -> Self {
        Owners(0)
    }

    #[inline(always)]
    pub(crate) fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    #[inline(always)]
    pub(crate) fn clear(&mut self, bit: u8) {
        self.0 &= !bit;
    }

    #[inline(always)]
    pub(crate) fn holds(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    #[inline(always)]
    pub(crate) fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Per-kind payload and progress of a request.
///
/// An xoff counter is an explicit variant, not a disguised write: the TX
/// feed treats `counting: false` like a one-byte write, and the completion
/// paths read the phase directly instead of downcasting.
#[derive(Debug)]
pub(crate) enum RequestBody {
    /// Read user data; `target_len` may be crunched below `buf.len()` by
    /// return-on-first-byte semantics
    Read {
        buf: Vec<u8>,
        target_len: usize,
    },
    /// Grow the RX ring (runs in read-queue order)
    Resize { new_capacity: usize },
    /// Transmit user data
    Write { data: Vec<u8> },
    /// Complete once all earlier writes have drained
    Flush,
    /// Emit an xoff character, then count down received bytes
    XoffCounter {
        xoff_char: u8,
        count: u32,
        timeout: Option<u32>,
        counting: bool,
    },
    /// Transmit one byte ahead of any queued write data
    Immediate { ch: u8 },
    /// Wait for events matching the armed mask
    Wait,
}

impl RequestBody {
    pub(crate) fn kind(&self) -> CompletionKind {
        match self {
            RequestBody::Read { .. } => CompletionKind::Read,
            RequestBody::Resize { .. } => CompletionKind::Resize,
            RequestBody::Write { .. } => CompletionKind::Write,
            RequestBody::Flush => CompletionKind::Flush,
            RequestBody::XoffCounter { .. } => CompletionKind::XoffCounter,
            RequestBody::Immediate { .. } => CompletionKind::Immediate,
            RequestBody::Wait => CompletionKind::Wait,
        }
    }
}

/// One queued or in-flight operation.
#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) id: RequestId,
    pub(crate) body: RequestBody,
    /// Bytes transferred, as reported on completion
    pub(crate) info: usize,
    /// Event bits published into a wait
    pub(crate) events: u32,
    pub(crate) owners: Owners,
}

impl Request {
    pub(crate) fn new(id: RequestId, body: RequestBody) -> Self {
        Self {
            id,
            body,
            info: 0,
            events: 0,
            owners: Owners::none(),
        }
    }

    /// Build the completion record, consuming the request.
    pub(crate) fn into_completion(self, status: CompletionStatus) -> Completion {
        let kind = self.body.kind();
        let data = match self.body {
            RequestBody::Read { mut buf, .. } => {
                buf.truncate(self.info);
                Some(buf)
            }
            _ => None,
        };
        Completion {
            id: self.id,
            kind,
            status,
            bytes_transferred: self.info,
            data,
            events: self.events,
        }
    }
}

// =============================================================================
// Per-Kind Queues
// =============================================================================

/// The current request of one kind plus the FIFO behind it.
#[derive(Debug, Default)]
pub(crate) struct RequestSlot {
    pub(crate) current: Option<Request>,
    pub(crate) queue: VecDeque<Request>,
}

impl RequestSlot {
    pub(crate) const fn new() -> Self {
        Self {
            current: None,
            queue: VecDeque::new(),
        }
    }

    /// Install `req` as current if the slot is idle, else append it.
    /// Returns `true` when the request became current (and should be
    /// started now).
    pub(crate) fn enqueue_or_start(&mut self, req: Request) -> bool {
        if self.current.is_none() {
            self.current = Some(req);
            true
        } else {
            self.queue.push_back(req);
            false
        }
    }

    /// Remove the current request (completion path only) and promote the
    /// queue head. Returns the finished request and whether a new current
    /// request now needs starting.
    pub(crate) fn finish_current(&mut self) -> (Option<Request>, bool) {
        let done = self.current.take();
        self.current = self.queue.pop_front();
        (done, self.current.is_some())
    }

    /// Remove a queued (non-current) request by id.
    pub(crate) fn remove_queued(&mut self, id: RequestId) -> Option<Request> {
        let pos = self.queue.iter().position(|r| r.id == id)?;
        self.queue.remove(pos)
    }

    /// Drain every queued (non-current) request.
    pub(crate) fn drain_queue(&mut self) -> VecDeque<Request> {
        core::mem::take(&mut self.queue)
    }

    pub(crate) fn is_current(&self, id: RequestId) -> bool {
        self.current.as_ref().is_some_and(|r| r.id == id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn read_req(id: u64, len: usize) -> Request {
        Request::new(
            RequestId(id),
            RequestBody::Read {
                buf: vec![0; len],
                target_len: len,
            },
        )
    }

    #[test]
    fn owners_set_clear() {
        let mut owners = Owners::none();
        assert!(owners.is_empty());

        owners.set(Owners::ISR);
        owners.set(Owners::CANCEL);
        assert!(owners.holds(Owners::ISR));
        assert!(owners.holds(Owners::CANCEL));
        assert!(!owners.holds(Owners::TOTAL_TIMER));
        assert!(!owners.is_empty());

        owners.clear(Owners::ISR);
        assert!(!owners.holds(Owners::ISR));
        owners.clear(Owners::CANCEL);
        assert!(owners.is_empty());
    }

    #[test]
    fn owner_bits_are_distinct() {
        let bits = [
            Owners::ISR,
            Owners::CANCEL,
            Owners::TOTAL_TIMER,
            Owners::INTERVAL_TIMER,
            Owners::XOFF,
        ];
        let mut seen = 0u8;
        for bit in bits {
            assert_eq!(seen & bit, 0);
            seen |= bit;
        }
    }

    #[test]
    fn slot_starts_first_request() {
        let mut slot = RequestSlot::new();
        assert!(slot.enqueue_or_start(read_req(1, 4)));
        assert!(!slot.enqueue_or_start(read_req(2, 4)));
        assert!(slot.is_current(RequestId(1)));
        assert!(!slot.is_current(RequestId(2)));
    }

    #[test]
    fn finish_promotes_fifo_order() {
        let mut slot = RequestSlot::new();
        slot.enqueue_or_start(read_req(1, 4));
        slot.enqueue_or_start(read_req(2, 4));
        slot.enqueue_or_start(read_req(3, 4));

        let (done, more) = slot.finish_current();
        assert_eq!(done.unwrap().id, RequestId(1));
        assert!(more);
        assert!(slot.is_current(RequestId(2)));

        let (done, more) = slot.finish_current();
        assert_eq!(done.unwrap().id, RequestId(2));
        assert!(more);

        let (done, more) = slot.finish_current();
        assert_eq!(done.unwrap().id, RequestId(3));
        assert!(!more);
        assert!(slot.current.is_none());
    }

    #[test]
    fn remove_queued_leaves_current() {
        let mut slot = RequestSlot::new();
        slot.enqueue_or_start(read_req(1, 4));
        slot.enqueue_or_start(read_req(2, 4));
        slot.enqueue_or_start(read_req(3, 4));

        let removed = slot.remove_queued(RequestId(2)).unwrap();
        assert_eq!(removed.id, RequestId(2));
        assert!(slot.remove_queued(RequestId(2)).is_none());
        assert!(slot.remove_queued(RequestId(1)).is_none());
        assert!(slot.is_current(RequestId(1)));
    }

    #[test]
    fn read_completion_truncates_payload() {
        let mut req = read_req(7, 10);
        if let RequestBody::Read { buf, .. } = &mut req.body {
            buf[0] = b'h';
            buf[1] = b'i';
        }
        req.info = 2;

        let completion = req.into_completion(CompletionStatus::Timeout);
        assert_eq!(completion.id, RequestId(7));
        assert_eq!(completion.kind, CompletionKind::Read);
        assert_eq!(completion.status, CompletionStatus::Timeout);
        assert_eq!(completion.bytes_transferred, 2);
        assert_eq!(completion.data.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn write_completion_has_no_payload() {
        let req = Request::new(
            RequestId(9),
            RequestBody::Write {
                data: vec![1, 2, 3],
            },
        );
        let completion = req.into_completion(CompletionStatus::Success);
        assert_eq!(completion.kind, CompletionKind::Write);
        assert!(completion.data.is_none());
    }

    #[test]
    fn body_kind_mapping() {
        assert_eq!(
            RequestBody::Flush.kind(),
            CompletionKind::Flush
        );
        assert_eq!(
            RequestBody::Immediate { ch: 0x41 }.kind(),
            CompletionKind::Immediate
        );
        assert_eq!(RequestBody::Wait.kind(), CompletionKind::Wait);
        assert_eq!(
            RequestBody::Resize { new_capacity: 64 }.kind(),
            CompletionKind::Resize
        );
    }
}
