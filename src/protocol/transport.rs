//! Line-delimited JSON-RPC transport.
//!
//! One JSON message per line in both directions. Decoded inbound messages sit
//! in a bounded queue until the dispatcher pulls them with [`Transport::recv`].
//! Outbound messages go through a second bounded queue that a background task
//! drains into the byte sink. When that queue stays full past the caller's
//! deadline the message is written directly, so a slow drain can never stall
//! a handler forever. Direct writes may overtake queued ones.

use crate::config::ServerConfig;
use crate::error::{TransportError, TransportResult};
use crate::protocol::types::{JsonRpcError, JsonRpcMessage, RequestId};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use std::io;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    Stdin, Stdout,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Message transport used by the server.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Next decoded inbound message.
    ///
    /// Returns `None` once the transport is closed or the input stream has
    /// ended and every already-decoded message has been handed out.
    async fn recv(&self) -> Option<JsonRpcMessage>;

    /// Queue `message` for sending, waiting at most `deadline` for room
    /// before writing it directly.
    async fn write(&self, message: JsonRpcMessage, deadline: Duration) -> TransportResult<()>;

    /// Stop reading and release blocked receivers. Idempotent.
    fn close(&self) -> TransportResult<()>;
}

/// Transport over any pair of async byte streams, stdin/stdout by default.
pub struct StdioTransport<R, W> {
    reader: Mutex<Option<R>>,
    writer: Arc<tokio::sync::Mutex<W>>,
    inbound_tx: Mutex<Option<mpsc::Sender<JsonRpcMessage>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<JsonRpcMessage>>,
    outbound_tx: mpsc::Sender<JsonRpcMessage>,
    outbound_rx: Mutex<Option<mpsc::Receiver<JsonRpcMessage>>>,
    closed: CancellationToken,
    close_logged: AtomicBool,
    max_message_bytes: usize,
    write_timeout: Duration,
}

impl StdioTransport<Stdin, Stdout> {
    /// Transport over the process's standard input and output.
    pub fn stdio(config: &ServerConfig) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), config)
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, config: &ServerConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));

        Self {
            reader: Mutex::new(Some(reader)),
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            closed: CancellationToken::new(),
            close_logged: AtomicBool::new(false),
            max_message_bytes: config.max_message_bytes,
            write_timeout: config.outgoing_message_timeout,
        }
    }

    /// Run the transport until end of input, close, cancellation or a read error.
    ///
    /// Spawns the outbound drain task and reads inbound lines on the calling
    /// task. End of input, close and cancellation all return `Ok`.
    pub async fn start(&self, cancel: CancellationToken) -> TransportResult<()> {
        let reader = self.reader.lock().take().ok_or(TransportError::Closed)?;
        let inbound = self.inbound_tx.lock().take().ok_or(TransportError::Closed)?;

        if let Some(outbound) = self.outbound_rx.lock().take() {
            tokio::spawn(drain_outbound(
                Arc::clone(&self.writer),
                outbound,
                self.closed.clone(),
                cancel.clone(),
            ));
        }

        debug!("Transport started");
        let result = self.read_loop(reader, &inbound, &cancel).await;
        // Dropping the sender lets recv() observe end of input once the queue is empty.
        drop(inbound);
        result
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn read_loop(
        &self,
        reader: R,
        inbound: &mpsc::Sender<JsonRpcMessage>,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Transport read loop cancelled");
                    return Ok(());
                }
                _ = self.closed.cancelled() => {
                    debug!("Transport closed, stopping read loop");
                    return Ok(());
                }
                read = read_frame(&mut reader, &mut buf, self.max_message_bytes) => read,
            };

            match read {
                Ok(Frame::Eof) => {
                    info!("End of input stream");
                    return Ok(());
                }
                Ok(Frame::Line) => {}
                Ok(Frame::Oversized) => {
                    warn!(limit = self.max_message_bytes, "Inbound message exceeds size limit");
                    self.reply_parse_error(None).await;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read from input stream");
                    return Err(TransportError::Io(e));
                }
            }

            let Some(message) = self.decode_line(&buf).await else {
                continue;
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.closed.cancelled() => return Ok(()),
                sent = inbound.send(message) => {
                    if sent.is_err() {
                        debug!("Inbound queue dropped, stopping read loop");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Decode one raw line. Undecodable input is answered with a parse error.
    async fn decode_line(&self, line: &[u8]) -> Option<JsonRpcMessage> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return None;
        }

        if line.len() > self.max_message_bytes {
            warn!(
                size = line.len(),
                limit = self.max_message_bytes,
                "Inbound message exceeds size limit"
            );
            self.reply_parse_error(None).await;
            return None;
        }

        trace!(line = %String::from_utf8_lossy(line), "Received line");

        match serde_json::from_slice::<JsonRpcMessage>(line) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "Failed to decode inbound message");
                self.reply_parse_error(recover_id(line)).await;
                None
            }
        }
    }

    async fn reply_parse_error(&self, id: Option<RequestId>) {
        let response = JsonRpcMessage::error_response(id, JsonRpcError::parse_error());
        if let Err(e) = self.write(response, self.write_timeout).await {
            error!(error = %e, "Failed to send parse error response");
        }
    }

    async fn write_direct(&self, message: &JsonRpcMessage) -> TransportResult<()> {
        write_message(&self.writer, message).await
    }
}

#[async_trait::async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&self) -> Option<JsonRpcMessage> {
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            biased;
            message = inbound.recv() => message,
            _ = self.closed.cancelled() => inbound.try_recv().ok(),
        }
    }

    async fn write(&self, message: JsonRpcMessage, deadline: Duration) -> TransportResult<()> {
        let message = match self.outbound_tx.try_send(message) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(message)) => message,
            Err(TrySendError::Closed(message)) => return self.write_direct(&message).await,
        };

        match tokio::time::timeout(deadline, self.outbound_tx.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(message);
                Ok(())
            }
            Ok(Err(_)) => self.write_direct(&message).await,
            Err(_) => {
                warn!(
                    deadline = ?deadline,
                    "Outbound queue still full at deadline, writing directly"
                );
                self.write_direct(&message).await
            }
        }
    }

    fn close(&self) -> TransportResult<()> {
        if !self.close_logged.swap(true, Ordering::SeqCst) {
            info!("Transport closed");
        }
        self.closed.cancel();
        Ok(())
    }
}

/// Outcome of reading one inbound line.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Eof,
    Line,
    /// The line ran past the limit; it has been consumed and discarded.
    Oversized,
}

/// Read one line into `buf`, buffering at most `limit` bytes plus a line ending.
///
/// The rest of an oversized line is skipped in bounded chunks, so memory use
/// stays flat no matter how long the peer's line is.
async fn read_frame<B>(reader: &mut B, buf: &mut Vec<u8>, limit: usize) -> io::Result<Frame>
where
    B: AsyncBufRead + Unpin,
{
    let cap = limit.saturating_add(2) as u64;
    let n = (&mut *reader).take(cap).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') || (n as u64) < cap {
        return Ok(Frame::Line);
    }

    let mut scratch = Vec::new();
    loop {
        scratch.clear();
        let n = (&mut *reader).take(cap).read_until(b'\n', &mut scratch).await?;
        if n == 0 || scratch.last() == Some(&b'\n') {
            return Ok(Frame::Oversized);
        }
    }
}

/// Best-effort recovery of the `id` member from a line that failed to decode
/// as an envelope but is still valid JSON.
fn recover_id(line: &[u8]) -> Option<RequestId> {
    serde_json::from_slice::<Value>(line)
        .ok()
        .and_then(|value| value.get("id").and_then(RequestId::from_value))
}

async fn write_message<W>(
    writer: &tokio::sync::Mutex<W>,
    message: &JsonRpcMessage,
) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(message).map_err(TransportError::Encode)?;
    bytes.push(b'\n');

    let mut writer = writer.lock().await;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    trace!(bytes = bytes.len(), "Sent message");
    Ok(())
}

async fn drain_outbound<W>(
    writer: Arc<tokio::sync::Mutex<W>>,
    mut outbound: mpsc::Receiver<JsonRpcMessage>,
    closed: CancellationToken,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let message = tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = closed.cancelled() => break,
            _ = cancel.cancelled() => break,
        };

        if let Err(e) = write_message(&writer, &message).await {
            error!(error = %e, "Failed to write outbound message");
        }
    }

    // Later writes find the queue closed and go straight to the sink.
    outbound.close();
    while let Ok(message) = outbound.try_recv() {
        if let Err(e) = write_message(&writer, &message).await {
            error!(error = %e, "Failed to flush outbound message");
        }
    }
    debug!("Outbound drain task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::Request;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream, Lines, ReadHalf, WriteHalf};
    use tokio::time::timeout;

    type Pipe = StdioTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    struct Peer {
        writer: WriteHalf<DuplexStream>,
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    }

    impl Peer {
        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn next(&mut self) -> Value {
            let line = timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("timed out waiting for output")
                .unwrap()
                .expect("output stream ended");
            serde_json::from_str(&line).unwrap()
        }
    }

    fn pipe(config: &ServerConfig) -> (Arc<Pipe>, Peer) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);
        let transport = Arc::new(StdioTransport::new(server_read, server_write, config));
        let peer = Peer {
            writer: client_write,
            lines: BufReader::new(client_read).lines(),
        };
        (transport, peer)
    }

    fn spawn_start(
        transport: &Arc<Pipe>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<TransportResult<()>> {
        let transport = Arc::clone(transport);
        let cancel = cancel.clone();
        tokio::spawn(async move { transport.start(cancel).await })
    }

    #[tokio::test]
    async fn test_decodes_lines_in_order() {
        let (transport, mut peer) = pipe(&ServerConfig::default());
        let cancel = CancellationToken::new();
        let _task = spawn_start(&transport, &cancel);

        peer.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).await;
        peer.send("").await;
        peer.send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;

        let first = transport.recv().await.unwrap();
        assert!(first.is_request());
        assert_eq!(first.id, Some(RequestId::from(1)));

        let second = transport.recv().await.unwrap();
        assert!(second.is_notification());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_malformed_line_is_answered_and_skipped() {
        let (transport, mut peer) = pipe(&ServerConfig::default());
        let cancel = CancellationToken::new();
        let _task = spawn_start(&transport, &cancel);

        peer.send("this is not json").await;
        peer.send(r#"{"jsonrpc":"2.0","id":2,"method":"initialize"}"#)
            .await;

        let reply = peer.next().await;
        assert_eq!(reply["error"]["code"], json!(-32700));
        assert_eq!(reply["id"], Value::Null);

        let next = transport.recv().await.unwrap();
        assert_eq!(next.method.as_deref(), Some("initialize"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_parse_error_recovers_id() {
        let (transport, mut peer) = pipe(&ServerConfig::default());
        let cancel = CancellationToken::new();
        let _task = spawn_start(&transport, &cancel);

        // Valid JSON, but params is not an object.
        peer.send(r#"{"jsonrpc":"2.0","id":"x-1","method":"ping","params":[1,2]}"#)
            .await;

        let reply = peer.next().await;
        assert_eq!(reply["error"]["code"], json!(-32700));
        assert_eq!(reply["id"], json!("x-1"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected() {
        let config = ServerConfig::builder().max_message_bytes(64).build().unwrap();
        let (transport, mut peer) = pipe(&config);
        let cancel = CancellationToken::new();
        let _task = spawn_start(&transport, &cancel);

        let padding = "a".repeat(128);
        peer.send(&format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"ping","params":{{"pad":"{}"}}}}"#,
            padding
        ))
        .await;
        peer.send(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await;

        let reply = peer.next().await;
        assert_eq!(reply["error"]["code"], json!(-32700));

        let next = transport.recv().await.unwrap();
        assert_eq!(next.id, Some(RequestId::from(2)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_read_frame_stops_buffering_at_limit() {
        let mut data = vec![b'x'; 10_000];
        data.extend_from_slice(b"\n{\"ok\":true}\n");
        let mut reader: &[u8] = &data;
        let mut buf = Vec::new();

        let frame = read_frame(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(frame, Frame::Oversized);
        assert!(buf.len() <= 66);

        buf.clear();
        let frame = read_frame(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(frame, Frame::Line);
        assert_eq!(buf, b"{\"ok\":true}\n");

        buf.clear();
        let frame = read_frame(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(frame, Frame::Eof);
    }

    #[tokio::test]
    async fn test_read_frame_unterminated_oversized_line() {
        let data = vec![b'x'; 10_000];
        let mut reader: &[u8] = &data;
        let mut buf = Vec::new();

        let frame = read_frame(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(frame, Frame::Oversized);
        assert!(buf.len() <= 66);
    }

    #[tokio::test]
    async fn test_huge_line_is_skipped_without_buffering() {
        let config = ServerConfig::builder().max_message_bytes(1024).build().unwrap();
        let (transport, mut peer) = pipe(&config);
        let cancel = CancellationToken::new();
        let _task = spawn_start(&transport, &cancel);

        peer.send(&"z".repeat(1024 * 1024)).await;
        peer.send(r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#).await;

        let reply = peer.next().await;
        assert_eq!(reply["error"]["code"], json!(-32700));
        assert_eq!(reply["id"], Value::Null);

        let next = transport.recv().await.unwrap();
        assert_eq!(next.id, Some(RequestId::from(3)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_end_of_input_drains_queue() {
        let (transport, mut peer) = pipe(&ServerConfig::default());
        let cancel = CancellationToken::new();
        let task = spawn_start(&transport, &cancel);

        peer.send(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).await;
        peer.writer.shutdown().await.unwrap();

        let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());

        assert!(transport.recv().await.is_some());
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_unblocks_read() {
        let (transport, _peer) = pipe(&ServerConfig::default());
        let cancel = CancellationToken::new();
        let task = spawn_start(&transport, &cancel);

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_recv() {
        let (transport, _peer) = pipe(&ServerConfig::default());
        let cancel = CancellationToken::new();
        let task = spawn_start(&transport, &cancel);

        let receiver = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.close().is_ok());
        assert!(transport.close().is_ok());
        assert!(transport.is_closed());

        let received = timeout(Duration::from_secs(5), receiver).await.unwrap().unwrap();
        assert!(received.is_none());

        let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (transport, _peer) = pipe(&ServerConfig::default());
        let cancel = CancellationToken::new();
        let _task = spawn_start(&transport, &cancel);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = transport.start(cancel.clone()).await;
        assert!(matches!(second, Err(TransportError::Closed)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_write_goes_through_queue() {
        let (transport, mut peer) = pipe(&ServerConfig::default());
        let cancel = CancellationToken::new();
        let _task = spawn_start(&transport, &cancel);

        let response = JsonRpcMessage::ping_response(RequestId::from(3));
        transport
            .write(response, Duration::from_secs(1))
            .await
            .unwrap();

        let line = peer.next().await;
        assert_eq!(line, json!({"jsonrpc": "2.0", "id": 3, "result": {}}));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_full_queue_falls_back_to_direct_write() {
        let config = ServerConfig::builder()
            .outbound_queue_capacity(1)
            .build()
            .unwrap();
        let (transport, mut peer) = pipe(&config);

        // No drain task yet: the first message parks in the queue.
        transport
            .write(Request::ping(1).into(), Duration::from_millis(10))
            .await
            .unwrap();
        transport
            .write(Request::ping(2).into(), Duration::from_millis(10))
            .await
            .unwrap();

        // The direct write overtook the queued one.
        assert_eq!(peer.next().await["id"], json!(2));

        let cancel = CancellationToken::new();
        let _task = spawn_start(&transport, &cancel);
        assert_eq!(peer.next().await["id"], json!(1));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_writes_after_close_still_reach_sink() {
        let (transport, mut peer) = pipe(&ServerConfig::default());
        let cancel = CancellationToken::new();
        let task = spawn_start(&transport, &cancel);
        tokio::time::sleep(Duration::from_millis(20)).await;

        transport.close().unwrap();
        timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        // Give the drain task a moment to observe the close.
        tokio::time::sleep(Duration::from_millis(20)).await;

        transport
            .write(
                JsonRpcMessage::ping_response(RequestId::from(4)),
                Duration::from_millis(50),
            )
            .await
            .unwrap();
        assert_eq!(peer.next().await["id"], json!(4));
    }
}
