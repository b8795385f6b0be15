use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{Error, LinkError};
use crate::protocol::{create_command, Command, MAX_COMMAND_LENGTH};
use crate::reassembly::ReassemblyBuffer;

/// Default deadline for one command exchange.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Granularity of the cooperative wait while a response is assembling.
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Abstract wireless link carrying request/response exchanges with one
/// device.
///
/// Implementations own connection establishment and teardown; the session
/// only writes command frames and consumes chunk deliveries through the
/// registered [`ChunkSink`].
#[async_trait]
pub trait Link: Send {
    /// Whether the underlying link is currently usable.
    async fn is_connected(&self) -> bool;

    /// Writes one command frame to the device.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Registers the sink that receives asynchronous chunk deliveries,
    /// replacing any previously registered one.
    async fn subscribe(&mut self, sink: ChunkSink);
}

/// Opens and closes links to devices. The scan driver treats this as an
/// external collaborator; retry and backoff for connection loss live here,
/// not in the session.
#[async_trait]
pub trait Transport: Send {
    type Link: Link;

    async fn open(&mut self, address: &str) -> Result<Self::Link, LinkError>;

    /// Best-effort teardown, called exactly once per opened link.
    async fn close(&mut self, link: Self::Link);
}

/// Write end of the chunk delivery channel, bound to one session's buffer.
#[derive(Clone)]
pub struct ChunkSink {
    buffer: Arc<Mutex<ReassemblyBuffer>>,
}

impl ChunkSink {
    /// Feeds one delivery into the reassembly buffer. May be called from any
    /// task or thread. `is_final` marks deliveries the transport knows to be
    /// the last of a message.
    pub fn deliver(&self, chunk: &[u8], is_final: bool) {
        let mut buffer = lock(&self.buffer);
        buffer.push_chunk(chunk);
        if is_final {
            buffer.force_complete();
        }
    }
}

fn lock(buffer: &Mutex<ReassemblyBuffer>) -> MutexGuard<'_, ReassemblyBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observable progress of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sent,
    Awaiting,
    Complete,
    TimedOut,
    LinkLost,
}

/// Drives single request/response exchanges over a [`Link`].
///
/// One exchange is in flight at a time; `run_command` takes `&mut self` and
/// each call is a single pass through the session states with no automatic
/// retry.
pub struct Session<L: Link> {
    link: L,
    buffer: Arc<Mutex<ReassemblyBuffer>>,
    state: SessionState,
}

impl<L: Link> Session<L> {
    /// Wraps a connected link and registers the chunk sink with it.
    pub async fn new(mut link: L) -> Self {
        let buffer = Arc::new(Mutex::new(ReassemblyBuffer::new()));
        link.subscribe(ChunkSink {
            buffer: Arc::clone(&buffer),
        })
        .await;
        Self {
            link,
            buffer,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Releases the link, e.g. to hand it back to the transport for teardown.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Runs one command exchange: send the command frame, await the
    /// reassembled response under the deadline, return the raw frame.
    pub async fn run_command(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Result<Vec<u8>, Error> {
        let tx_buffer = create_command(command);
        if tx_buffer.len() > MAX_COMMAND_LENGTH {
            self.state = SessionState::LinkLost;
            return Err(Error::SendRejected(format!(
                "command length {} exceeds {MAX_COMMAND_LENGTH} bytes",
                tx_buffer.len()
            )));
        }
        if !self.link.is_connected().await {
            self.state = SessionState::LinkLost;
            return Err(Error::LinkUnavailable);
        }

        self.state = SessionState::Sent;
        log::trace!("write command: {tx_buffer:02X?}");
        if let Err(err) = self.link.send(&tx_buffer).await {
            self.state = SessionState::LinkLost;
            return Err(Error::SendRejected(err.to_string()));
        }

        lock(&self.buffer).reset();
        self.state = SessionState::Awaiting;

        let deadline = Instant::now() + timeout;
        loop {
            if lock(&self.buffer).is_complete() {
                break;
            }
            if !self.link.is_connected().await {
                log::warn!("Link lost while awaiting response to {command:?}");
                self.state = SessionState::LinkLost;
                return Err(Error::LinkLost);
            }
            if Instant::now() >= deadline {
                log::warn!("Command {command:?} timed out after {timeout:?}");
                lock(&self.buffer).reset();
                self.state = SessionState::TimedOut;
                return Err(Error::Timeout(timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        self.state = SessionState::Complete;
        let rx_buffer = lock(&self.buffer).bytes().to_vec();
        log::trace!("response frame: {rx_buffer:02X?}");

        // The device flags command errors in byte 2 before any payload.
        if rx_buffer.len() < 3 || rx_buffer[2] != 0x00 {
            return Err(Error::MalformedFrame("device reported an error status"));
        }
        Ok(rx_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{response_frame, MockChunk, MockLink};
    use std::sync::atomic::Ordering;

    fn basic_reply() -> Vec<u8> {
        response_frame(Command::BasicInfo as u8, &[0u8; 23])
    }

    #[tokio::test]
    async fn run_command_returns_assembled_frame() {
        let link = MockLink::new();
        let script = link.script();
        let frame = basic_reply();
        script.enqueue(vec![
            MockChunk::new(frame[..10].to_vec()),
            MockChunk::delayed(frame[10..].to_vec(), Duration::from_millis(40)),
        ]);

        let mut session = Session::new(link).await;
        let rx_buffer = session
            .run_command(Command::BasicInfo, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(rx_buffer, frame);
        assert_eq!(session.state(), SessionState::Complete);
    }

    #[tokio::test]
    async fn single_chunk_reply_completes() {
        let link = MockLink::new();
        let script = link.script();
        let frame = basic_reply();
        script.enqueue(vec![MockChunk::new(frame.clone())]);

        let mut session = Session::new(link).await;
        let rx_buffer = session
            .run_command(Command::BasicInfo, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(rx_buffer, frame);
    }

    #[tokio::test]
    async fn missing_response_times_out_and_buffer_recovers() {
        let link = MockLink::new();
        let script = link.script();

        let mut session = Session::new(link).await;
        let result = session
            .run_command(Command::BasicInfo, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(session.state(), SessionState::TimedOut);

        // The buffer was reset; the next attempt works.
        let frame = basic_reply();
        script.enqueue(vec![MockChunk::new(frame.clone())]);
        let rx_buffer = session
            .run_command(Command::BasicInfo, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(rx_buffer, frame);
    }

    #[tokio::test]
    async fn disconnected_link_fails_before_send() {
        let link = MockLink::new();
        link.connected_handle().store(false, Ordering::Relaxed);

        let mut session = Session::new(link).await;
        let result = session
            .run_command(Command::BasicInfo, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(Error::LinkUnavailable)));
        assert_eq!(session.state(), SessionState::LinkLost);
    }

    #[tokio::test]
    async fn rejected_send_maps_to_send_rejected() {
        let mut link = MockLink::new();
        link.reject_sends(true);

        let mut session = Session::new(link).await;
        let result = session
            .run_command(Command::BasicInfo, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(Error::SendRejected(_))));
        assert_eq!(session.state(), SessionState::LinkLost);
    }

    #[tokio::test]
    async fn link_loss_during_wait_is_detected() {
        let link = MockLink::new();
        let connected = link.connected_handle();

        let mut session = Session::new(link).await;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            connected.store(false, Ordering::Relaxed);
        });
        let result = session
            .run_command(Command::BasicInfo, Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(Error::LinkLost)));
        assert_eq!(session.state(), SessionState::LinkLost);
    }

    #[tokio::test]
    async fn device_error_status_is_rejected() {
        let link = MockLink::new();
        let script = link.script();
        // Error frames carry a non-zero status byte and no payload.
        script.enqueue(vec![MockChunk::new(vec![0xDD, 0x03, 0x80, 0x00, 0x77])]);

        let mut session = Session::new(link).await;
        let result = session
            .run_command(Command::BasicInfo, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }

    #[tokio::test]
    async fn transport_finality_hint_completes_a_partial_frame() {
        let link = MockLink::new();
        let script = link.script();
        // Status byte, no end marker; only the transport knows it is done.
        script.enqueue(vec![MockChunk::new(vec![0xDD, 0x03, 0x00, 0x00]).finality()]);

        let mut session = Session::new(link).await;
        let rx_buffer = session
            .run_command(Command::BasicInfo, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(rx_buffer, vec![0xDD, 0x03, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn sent_command_is_the_encoded_frame() {
        let link = MockLink::new();
        let script = link.script();
        let sent = link.sent_handle();
        script.enqueue(vec![MockChunk::new(basic_reply())]);

        let mut session = Session::new(link).await;
        session
            .run_command(Command::BasicInfo, Duration::from_secs(1))
            .await
            .unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], create_command(Command::BasicInfo));
    }
}
