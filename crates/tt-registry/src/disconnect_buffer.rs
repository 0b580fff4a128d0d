//! Bounded in-memory replay buffer for `useMux=false` terminals during the
//! disconnect grace window. The open question in the design ("should
//! `useMux=false` support detach-with-grace at all?") is resolved here by
//! defining this buffer rather than forbidding the state — see DESIGN.md.
//! `useMux=true` terminals never need one: the mux session itself is the
//! scrollback authority.

use std::collections::VecDeque;

pub struct DisconnectBuffer {
    data: VecDeque<u8>,
    max_bytes: usize,
}

impl DisconnectBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(max_bytes.min(4096)),
            max_bytes,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.data.len() >= self.max_bytes {
                self.data.pop_front();
            }
            self.data.push_back(b);
        }
    }

    pub fn drain_all(&mut self) -> Vec<u8> {
        self.data.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_drain_roundtrip() {
        let mut buf = DisconnectBuffer::new(16);
        buf.push(b"hello");
        buf.push(b" world");
        assert_eq!(buf.drain_all(), b"hello world");
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let mut buf = DisconnectBuffer::new(8);
        buf.push(b"abcdefghij");
        assert_eq!(buf.drain_all(), b"cdefghij");
    }
}
