//! Per-target connection task: the connection state machine.
//!
//! ```text
//!         begin                connected            read_event
//!  [*] ─────────► Connecting ───────────► Connected ──loop──► Connected
//!                     │                       │
//!                     │ connect_err / timeout │ read_err / timeout / eof / buffer_full
//!                     ▼                       ▼
//!                  Terminal ◄─────────────────┘
//! ```
//!
//! A task is a value owned by the `TaskRegistry` slab until it
//! reaches `Phase::Terminal`, at which point the run loop removes and
//! drops it: no raw pointers, no manual lifetime tracking.

use bytes::BytesMut;
use mio::net::TcpStream;
use std::net::Ipv4Addr;
use std::time::Instant;

/// Current phase of a connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Connected,
    Terminal,
}

/// A pending, possibly partially-flushed send-template write.
pub struct PendingSend {
    pub bytes: Vec<u8>,
    pub written: usize,
}

impl PendingSend {
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.written..]
    }

    pub fn is_done(&self) -> bool {
        self.written >= self.bytes.len()
    }
}

/// One in-flight target. Owns exactly one socket and one response
/// buffer.
pub struct Task {
    pub stream: TcpStream,
    pub phase: Phase,
    pub peer: Ipv4Addr,
    pub buf: BytesMut,
    /// Deadline for the current phase: connect deadline while
    /// `Connecting`, read-idle deadline while `Connected`. The read
    /// deadline is pushed forward on every read event, so the read
    /// timeout governs each inter-byte idle interval rather than the
    /// total connection lifetime.
    pub deadline: Instant,
    pub pending_send: Option<PendingSend>,
}

impl Task {
    pub fn new(stream: TcpStream, peer: Ipv4Addr, connect_deadline: Instant, max_read_size: usize) -> Self {
        Self {
            stream,
            phase: Phase::Connecting,
            peer,
            buf: BytesMut::with_capacity(max_read_size.min(8192)),
            deadline: connect_deadline,
            pending_send: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_send_tracks_partial_writes() {
        let mut p = PendingSend {
            bytes: b"hello".to_vec(),
            written: 0,
        };
        assert_eq!(p.remaining(), b"hello");
        assert!(!p.is_done());
        p.written = 3;
        assert_eq!(p.remaining(), b"lo");
        p.written = 5;
        assert!(p.is_done());
    }
}
