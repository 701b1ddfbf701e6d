//! Request multiplexing over a single connection.
//!
//! Many callers share one socket. Each request gets a connection-scoped id,
//! frames are written one at a time under the writer lock, and a background
//! read loop matches every response frame back to its caller by id, in
//! whatever order the server answers.

use crate::error::ClientError;
use bytes::BytesMut;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tnt_protocol::{
    Decoder, Encoder, FrameHeader, Operation, ProtocolError, Request, Response, ResponseShape,
    FRAME_HEADER_SIZE,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Completion = oneshot::Sender<Result<Response, ClientError>>;

/// An in-flight request awaiting its response.
struct PendingCall {
    operation: Operation,
    shape: ResponseShape,
    tx: Completion,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u32, PendingCall>,
    closed: bool,
}

/// State shared between callers and the read loop.
struct Shared {
    pending: parking_lot::Mutex<PendingTable>,
    /// Flips to `true` on teardown; interrupts frame writes in progress.
    closed_signal: watch::Sender<bool>,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: parking_lot::Mutex::new(PendingTable::default()),
            closed_signal: watch::Sender::new(false),
        }
    }

    fn register(&self, request_id: u32, call: PendingCall) -> Result<(), ClientError> {
        let mut table = self.pending.lock();
        if table.closed {
            return Err(ClientError::ConnectionClosed);
        }
        table.calls.insert(request_id, call);
        Ok(())
    }

    fn take(&self, request_id: u32) -> Option<PendingCall> {
        self.pending.lock().calls.remove(&request_id)
    }

    /// Marks the table closed and fails every outstanding call.
    fn close(&self) -> usize {
        let calls: Vec<PendingCall> = {
            let mut table = self.pending.lock();
            table.closed = true;
            table.calls.drain().map(|(_, call)| call).collect()
        };
        self.closed_signal.send_replace(true);

        let failed = calls.len();
        for call in calls {
            let _ = call.tx.send(Err(ClientError::ConnectionClosed));
        }
        failed
    }

    fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    fn len(&self) -> usize {
        self.pending.lock().calls.len()
    }
}

/// Handle to the eventual response of a sent request.
#[derive(Debug)]
pub struct PendingResponse {
    request_id: u32,
    rx: oneshot::Receiver<Result<Response, ClientError>>,
}

impl PendingResponse {
    pub fn request_id(&self) -> u32 {
        self.request_id
    }
}

impl Future for PendingResponse {
    type Output = Result<Response, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ClientError::ConnectionClosed)))
    }
}

/// Owns one socket and multiplexes requests over it.
pub struct Dispatcher {
    /// Write half of the stream; `None` once closed.
    writer: Mutex<Option<BoxedWriter>>,
    shared: Arc<Shared>,
    next_id: AtomicU32,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Splits `stream` and spawns the read loop. Must be called from within
    /// a tokio runtime.
    pub fn start<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let shared = Arc::new(Shared::new());

        let reader_task = tokio::spawn(read_loop(read_half, shared.clone()));

        Self {
            writer: Mutex::new(Some(Box::new(write_half))),
            shared,
            next_id: AtomicU32::new(1),
            reader_task: parking_lot::Mutex::new(Some(reader_task)),
        }
    }

    fn next_request_id(&self) -> Result<u32, ClientError> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| ClientError::RequestIdsExhausted)
    }

    /// Sends a request and returns a handle resolving to its response.
    pub async fn send(&self, request: &Request) -> Result<PendingResponse, ClientError> {
        if self.shared.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::ConnectionClosed)?;

        let request_id = self.next_request_id()?;
        let operation = request.operation();
        let encoded = Encoder::encode_request(request_id, request)?;

        let (tx, rx) = oneshot::channel();
        self.shared.register(
            request_id,
            PendingCall {
                operation,
                shape: request.response_shape(),
                tx,
            },
        )?;

        tracing::debug!(
            "Sending request id={} op={:?} ({} bytes)",
            request_id,
            operation,
            encoded.len()
        );

        let mut closed = self.shared.closed_signal.subscribe();
        let written = tokio::select! {
            result = writer.write_all(&encoded) => Some(result),
            _ = closed.wait_for(|closed| *closed) => None,
        };

        match written {
            Some(Ok(())) => Ok(PendingResponse { request_id, rx }),
            Some(Err(e)) => {
                tracing::warn!("Write of request id={} failed: {}", request_id, e);
                *writer_guard = None;
                drop(writer_guard);
                self.shared.close();
                Err(ClientError::Io(e))
            }
            None => {
                // A partial frame may be on the wire; the writer is unusable.
                tracing::debug!("Write of request id={} interrupted by close", request_id);
                *writer_guard = None;
                Err(ClientError::ConnectionClosed)
            }
        }
    }

    /// Drops the pending call for `request_id`; a late response is discarded.
    pub fn forget(&self, request_id: u32) -> bool {
        self.shared.take(request_id).is_some()
    }

    /// Returns the number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes the connection, failing all outstanding requests with
    /// [`ClientError::ConnectionClosed`]. A frame write blocked on a peer
    /// that stopped reading is interrupted. Safe to call more than once.
    pub async fn close(&self) {
        let failed = self.shared.close();
        if failed > 0 {
            tracing::debug!("Failed {} pending requests on close", failed);
        }

        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            tracing::debug!("Shutting down writer");
            let _ = writer.shutdown().await;
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.get_mut().take() {
            task.abort();
        }
        self.shared.close();
    }
}

/// Reads frames until the socket fails, then tears the connection down.
async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    tracing::debug!("read_loop started");

    match read_frames(&mut reader, &shared).await {
        Ok(()) => tracing::debug!("read_loop: connection closed by server"),
        Err(e) => tracing::warn!("read_loop: terminating: {}", e),
    }

    let failed = shared.close();
    if failed > 0 {
        tracing::debug!("read_loop: failed {} pending requests", failed);
    }
}

async fn read_frames<R>(reader: &mut R, shared: &Shared) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];

    loop {
        if !read_header(reader, &mut header_buf).await? {
            return Ok(());
        }

        let header = FrameHeader::decode(&header_buf)?;
        header.validate()?;

        // A body shorter than declared surfaces as UnexpectedEof here.
        let mut body = BytesMut::zeroed(header.body_len as usize);
        reader.read_exact(&mut body).await?;

        let Some(call) = shared.take(header.request_id) else {
            tracing::warn!(
                "read_loop: no pending request for id={}, dropping {} byte response",
                header.request_id,
                header.body_len
            );
            continue;
        };

        if header.op_code != call.operation.code() {
            tracing::warn!(
                "read_loop: response id={} has op code {:#x}, expected {:#x}",
                header.request_id,
                header.op_code,
                call.operation.code()
            );
        }

        match Decoder::decode_response(call.shape, &body) {
            Ok(response) => {
                tracing::debug!(
                    "read_loop: dispatching response id={} return_code={:#x}",
                    header.request_id,
                    response.return_code.0
                );
                let _ = call.tx.send(Ok(response));
            }
            Err(e) => {
                let _ = call.tx.send(Err(ClientError::Protocol(e.clone())));
                return Err(ClientError::Protocol(e));
            }
        }
    }
}

/// Fills `buf` with the next frame header. Returns `false` on a clean EOF
/// between frames; EOF partway through a header is a malformed frame.
async fn read_header<R>(
    reader: &mut R,
    buf: &mut [u8; FRAME_HEADER_SIZE],
) -> Result<bool, ClientError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < FRAME_HEADER_SIZE {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(ProtocolError::MalformedFrame {
                needed: FRAME_HEADER_SIZE,
                available: filled,
            }
            .into());
        }
        filled += n;
    }
    Ok(true)
}
