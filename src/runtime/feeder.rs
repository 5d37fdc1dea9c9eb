//! Lazily parses stdin lines into target IPs.
//!
//! Reads raw bytes handed to it by the reactor (see
//! `runtime/mod.rs::handle_stdin_readable`) and splits on `\n`. A line
//! that fails to parse as a dotted-quad `Ipv4Addr` is silently dropped
//! rather than passed through as an unspecified address, to avoid
//! scanning `0.0.0.0` on every malformed line.

use std::net::Ipv4Addr;
use std::str::FromStr;

pub struct Feeder {
    buf: Vec<u8>,
    closed: bool,
}

impl Feeder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn feed_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pops and parses the next complete line, if any. Returns `None`
    /// once no full line is buffered, regardless of EOF state; callers
    /// check `is_closed()` separately to decide whether more lines could
    /// still arrive.
    pub fn next_target(&mut self) -> Option<Ipv4Addr> {
        loop {
            let newline_at = self.buf.iter().position(|&b| b == b'\n')?;
            let line: Vec<u8> = self.buf.drain(..=newline_at).collect();
            let trimmed = trim_line(&line[..line.len() - 1]);
            if trimmed.is_empty() {
                continue;
            }
            match std::str::from_utf8(trimmed).ok().and_then(|s| Ipv4Addr::from_str(s).ok()) {
                Some(addr) => return Some(addr),
                None => continue,
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\r' || line[end - 1] == b' ') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let mut f = Feeder::new();
        f.feed_bytes(b"127.0.0.1\n10.0.0.1\n");
        assert_eq!(f.next_target(), Some("127.0.0.1".parse().unwrap()));
        assert_eq!(f.next_target(), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(f.next_target(), None);
    }

    #[test]
    fn drops_malformed_lines_without_aborting_the_stream() {
        let mut f = Feeder::new();
        f.feed_bytes(b"not-an-ip\n127.0.0.1\n");
        assert_eq!(f.next_target(), Some("127.0.0.1".parse().unwrap()));
        assert_eq!(f.next_target(), None);
    }

    #[test]
    fn handles_carriage_returns_and_partial_lines() {
        let mut f = Feeder::new();
        f.feed_bytes(b"1.2.3.4\r\n5.6.7.");
        assert_eq!(f.next_target(), Some("1.2.3.4".parse().unwrap()));
        assert_eq!(f.next_target(), None);
        f.feed_bytes(b"8\n");
        assert_eq!(f.next_target(), Some("5.6.7.8".parse().unwrap()));
    }

    #[test]
    fn skips_blank_lines() {
        let mut f = Feeder::new();
        f.feed_bytes(b"\n\n9.9.9.9\n");
        assert_eq!(f.next_target(), Some("9.9.9.9".parse().unwrap()));
    }
}
