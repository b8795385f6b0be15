//! Scriptable in-memory [`Link`] and [`Transport`] implementations.
//!
//! Used by the test suites in this crate; also handy for exercising callers
//! without hardware on the bench.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LinkError;
use crate::protocol::{calc_checksum, FRAME_END, FRAME_START};
use crate::session::{ChunkSink, Link, Transport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds a well-formed response frame for `command` around `payload`.
pub fn response_frame(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![FRAME_START, command];
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&[0, 0, FRAME_END]);
    let checksum = calc_checksum(&frame);
    let n = frame.len();
    frame[n - 3..n - 1].copy_from_slice(&checksum.to_be_bytes());
    frame
}

/// One scripted delivery: a byte chunk handed to the sink after `delay`.
#[derive(Debug, Clone)]
pub struct MockChunk {
    delay: Duration,
    bytes: Vec<u8>,
    is_final: bool,
}

impl MockChunk {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            delay: Duration::ZERO,
            bytes,
            is_final: false,
        }
    }

    pub fn delayed(bytes: Vec<u8>, delay: Duration) -> Self {
        Self {
            delay,
            bytes,
            is_final: false,
        }
    }

    /// Marks this delivery as the transport-confirmed end of the message.
    pub fn finality(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// Queue of scripted replies. Each `send` on the link consumes one entry;
/// sends beyond the script get no reply at all.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    replies: Arc<Mutex<VecDeque<Vec<MockChunk>>>>,
}

impl MockScript {
    pub fn enqueue(&self, chunks: Vec<MockChunk>) {
        lock(&self.replies).push_back(chunks);
    }

    fn next(&self) -> Option<Vec<MockChunk>> {
        lock(&self.replies).pop_front()
    }
}

/// Scriptable link. Connection state and the sent-command log are shared
/// handles so tests can poke them while the session owns the link.
pub struct MockLink {
    address: String,
    connected: Arc<AtomicBool>,
    script: MockScript,
    sink: Arc<Mutex<Option<ChunkSink>>>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    reject_sends: bool,
}

impl MockLink {
    pub fn new() -> Self {
        Self::with_address("mock")
    }

    pub fn with_address(address: &str) -> Self {
        Self {
            address: address.to_string(),
            connected: Arc::new(AtomicBool::new(true)),
            script: MockScript::default(),
            sink: Arc::new(Mutex::new(None)),
            sent: Arc::new(Mutex::new(Vec::new())),
            reject_sends: false,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn script(&self) -> MockScript {
        self.script.clone()
    }

    /// Shared connection flag; clear it to simulate link loss.
    pub fn connected_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Log of every command frame written to this link.
    pub fn sent_handle(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.sent)
    }

    /// Makes every subsequent `send` fail.
    pub fn reject_sends(&mut self, reject: bool) {
        self.reject_sends = reject;
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Link for MockLink {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(LinkError::NotConnected);
        }
        if self.reject_sends {
            return Err(LinkError::Transport("write rejected by script".into()));
        }
        lock(&self.sent).push(bytes.to_vec());

        if let Some(chunks) = self.script.next() {
            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                for chunk in chunks {
                    if !chunk.delay.is_zero() {
                        tokio::time::sleep(chunk.delay).await;
                    }
                    if let Some(sink) = lock(&sink).clone() {
                        sink.deliver(&chunk.bytes, chunk.is_final);
                    }
                }
            });
        }
        Ok(())
    }

    async fn subscribe(&mut self, sink: ChunkSink) {
        *lock(&self.sink) = Some(sink);
    }
}

/// Scriptable transport: a queue of prepared links per device address, plus
/// a log of the addresses whose links were handed back for teardown.
#[derive(Default)]
pub struct MockTransport {
    links: HashMap<String, VecDeque<MockLink>>,
    closed: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_link(&mut self, link: MockLink) {
        self.links
            .entry(link.address.clone())
            .or_default()
            .push_back(link);
    }

    /// Addresses whose links have been closed, in order.
    pub fn closed_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = MockLink;

    async fn open(&mut self, address: &str) -> Result<Self::Link, LinkError> {
        self.links
            .get_mut(address)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| LinkError::Transport(format!("no scripted link for {address}")))
    }

    async fn close(&mut self, link: Self::Link) {
        link.connected.store(false, Ordering::Relaxed);
        lock(&self.closed).push(link.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_frame_has_a_valid_envelope() {
        let frame = response_frame(0x03, &[0x12, 0x34, 0x56]);
        assert_eq!(frame.len(), 10);
        assert_eq!(frame[0], FRAME_START);
        assert_eq!(frame[1], 0x03);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 3);
        assert_eq!(*frame.last().unwrap(), FRAME_END);
        let received = u16::from_be_bytes([frame[7], frame[8]]);
        assert_eq!(received, calc_checksum(&frame));
    }

    #[tokio::test]
    async fn transport_hands_out_links_in_order() {
        let mut transport = MockTransport::new();
        transport.add_link(MockLink::with_address("aa"));
        let closed = transport.closed_handle();

        let link = transport.open("aa").await.unwrap();
        assert_eq!(link.address(), "aa");
        transport.close(link).await;
        assert_eq!(*lock(&closed), vec!["aa".to_string()]);

        assert!(transport.open("aa").await.is_err());
        assert!(transport.open("bb").await.is_err());
    }
}
