use crate::protocol::{FRAME_END, FRAME_OVERHEAD, FRAME_START};

/// Fixed capacity of the response arena, with headroom over the largest
/// frame the devices emit.
pub const BUFFER_CAPACITY: usize = 256;

/// Accumulates asynchronously delivered transport chunks into one raw frame.
///
/// The buffer is reused across exchanges; [`ReassemblyBuffer::reset`] must be
/// called when a new command goes out. While assembling, the accumulated
/// bytes are never interpreted beyond the frame header.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    buf: [u8; BUFFER_CAPACITY],
    len: usize,
    expected_total: usize,
    awaiting_continuation: bool,
    complete: bool,
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0; BUFFER_CAPACITY],
            len: 0,
            expected_total: 0,
            awaiting_continuation: false,
            complete: false,
        }
    }

    /// Clears all accumulated state for the next exchange.
    pub fn reset(&mut self) {
        self.len = 0;
        self.expected_total = 0;
        self.awaiting_continuation = false;
        self.complete = false;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The bytes accumulated so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Marks the frame complete regardless of the declared length. Used when
    /// the transport flags a delivery as the final one of a message.
    pub fn force_complete(&mut self) {
        if self.len > 0 {
            self.complete = true;
            self.awaiting_continuation = false;
        }
    }

    /// Feeds one transport chunk. Completion is sticky: chunks arriving
    /// after the frame is complete are dropped until the next `reset`.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        if self.complete || chunk.is_empty() {
            return;
        }

        if self.len == 0 && chunk.len() >= 4 && chunk[0] == FRAME_START {
            // First chunk carries the declared payload length in bytes 2-3.
            let declared = usize::from(u16::from_be_bytes([chunk[2], chunk[3]]));
            self.expected_total = (declared + FRAME_OVERHEAD).min(BUFFER_CAPACITY);
            self.awaiting_continuation = self.expected_total > chunk.len();
            self.store(chunk);
        } else if self.awaiting_continuation && self.len > 0 {
            self.append(chunk);
        } else {
            // Out-of-protocol delivery: treat it as a fresh single-packet frame.
            self.len = 0;
            self.awaiting_continuation = false;
            self.store(chunk);
        }

        if !self.awaiting_continuation
            || self.len >= self.expected_total
            || self.buf[self.len - 1] == FRAME_END
        {
            self.complete = true;
            self.awaiting_continuation = false;
        }
    }

    fn store(&mut self, chunk: &[u8]) {
        let n = chunk.len().min(BUFFER_CAPACITY);
        self.buf[..n].copy_from_slice(&chunk[..n]);
        self.len = n;
    }

    fn append(&mut self, chunk: &[u8]) {
        // Excess bytes beyond capacity are silently dropped.
        let n = chunk.len().min(BUFFER_CAPACITY - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&chunk[..n]);
        self.len += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::response_frame;

    /// A 30-byte frame whose declared length implies exactly 30 bytes.
    fn thirty_byte_frame() -> Vec<u8> {
        let frame = response_frame(0x03, &[0x42; 23]);
        assert_eq!(frame.len(), 30);
        frame
    }

    #[test]
    fn single_chunk_completes_immediately() {
        let frame = thirty_byte_frame();
        let mut buffer = ReassemblyBuffer::new();
        buffer.push_chunk(&frame);
        assert!(buffer.is_complete());
        assert_eq!(buffer.bytes(), &frame[..]);
    }

    #[test]
    fn split_chunks_complete_only_on_last() {
        let frame = thirty_byte_frame();
        let mut buffer = ReassemblyBuffer::new();
        buffer.push_chunk(&frame[..10]);
        assert!(!buffer.is_complete());
        buffer.push_chunk(&frame[10..20]);
        assert!(!buffer.is_complete());
        buffer.push_chunk(&frame[20..]);
        assert!(buffer.is_complete());
        assert_eq!(buffer.bytes(), &frame[..]);
    }

    #[test]
    fn completion_is_sticky() {
        let frame = thirty_byte_frame();
        let mut buffer = ReassemblyBuffer::new();
        buffer.push_chunk(&frame);
        buffer.push_chunk(&[0xAA, 0xBB]);
        assert_eq!(buffer.bytes(), &frame[..]);
    }

    #[test]
    fn end_marker_completes_before_declared_total() {
        // Declared length promises 30 bytes but the device stops early.
        let frame = thirty_byte_frame();
        let mut buffer = ReassemblyBuffer::new();
        buffer.push_chunk(&frame[..10]);
        assert!(!buffer.is_complete());
        buffer.push_chunk(&[0x01, 0x02, FRAME_END]);
        assert!(buffer.is_complete());
        assert_eq!(buffer.bytes().len(), 13);
    }

    #[test]
    fn unexpected_chunk_becomes_single_packet_frame() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.push_chunk(&[0x01, 0x02, 0x03]);
        assert!(buffer.is_complete());
        assert_eq!(buffer.bytes(), &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn oversized_frame_is_clamped_to_capacity() {
        // Declared length of 400 exceeds the arena.
        let mut first = vec![FRAME_START, 0x03];
        first.extend_from_slice(&400u16.to_be_bytes());
        first.extend_from_slice(&[0x11; 96]);
        let mut buffer = ReassemblyBuffer::new();
        buffer.push_chunk(&first);
        assert!(!buffer.is_complete());
        buffer.push_chunk(&[0x22; 300]);
        assert!(buffer.is_complete());
        assert_eq!(buffer.bytes().len(), BUFFER_CAPACITY);
    }

    #[test]
    fn reset_allows_a_new_exchange() {
        let frame = thirty_byte_frame();
        let mut buffer = ReassemblyBuffer::new();
        buffer.push_chunk(&frame);
        assert!(buffer.is_complete());
        buffer.reset();
        assert!(!buffer.is_complete());
        assert!(buffer.bytes().is_empty());
        buffer.push_chunk(&frame[..10]);
        assert!(!buffer.is_complete());
    }

    #[test]
    fn final_flag_forces_completion() {
        let frame = thirty_byte_frame();
        let mut buffer = ReassemblyBuffer::new();
        buffer.push_chunk(&frame[..10]);
        assert!(!buffer.is_complete());
        buffer.force_complete();
        assert!(buffer.is_complete());
    }

    #[test]
    fn force_complete_on_empty_buffer_is_ignored() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.force_complete();
        assert!(!buffer.is_complete());
    }
}
