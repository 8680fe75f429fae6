//! Streaming body pipeline.
//!
//! # Outbound
//!
//! A deferred [`BodyWriter`](crate::BodyWriter) runs on a blocking worker thread and writes
//! into a [`BodySink`]. The sink batches bytes into chunks of `write_chunk_size` and hands
//! each chunk to a bounded channel with `blocking_send`. The channel is the request body the
//! transport streams onto the wire, so a slow connection blocks the writer and a slow writer
//! delays the body, without touching the event loop.
//!
//! # Inbound
//!
//! A pump task on the event loop reads the response body and forwards [`BodyEvent`]s through
//! a bounded channel to a [`BodyStream`]. Reads pull from the channel, blocking or
//! suspending until a chunk arrives. Events arrive in stream order and nothing follows
//! `End` or `Failed`. If the channel closes without `End` the body is reported as
//! prematurely closed.
//!
//! ```text
//!  writer thread ──BodySink──▶ mpsc ──▶ reqwest body ──▶ socket
//!  socket ──▶ bytes_stream ──pump──▶ mpsc<BodyEvent> ──▶ BodyStream::read / chunk
//! ```

use crate::engine::deadline::Deadline;
use crate::engine::translate;
use crate::error::{FailureKind, ProcessingError, Result};
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::future::poll_fn;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio_stream::wrappers::ReceiverStream;

/// Events delivered from the connection to a body reader.
#[derive(Debug)]
pub(crate) enum BodyEvent {
    Chunk(Bytes),
    End,
    Failed(ProcessingError),
}

/// Records the first failure of a deferred body writer.
///
/// The transport reports a broken request body as a generic send error; the slot lets the
/// failure translator tell a writer fault apart from a network fault.
#[derive(Debug, Clone, Default)]
pub(crate) struct WriteFailureSlot {
    inner: Arc<Mutex<Option<String>>>,
}

impl WriteFailureSlot {
    fn record(&self, reason: &str) {
        let mut slot = self.inner.lock();
        if slot.is_none() {
            *slot = Some(reason.to_string());
        }
    }

    pub(crate) fn take(&self) -> Option<String> {
        self.inner.lock().take()
    }
}

type ChunkResult = std::result::Result<Bytes, io::Error>;

/// Write side of a deferred request body.
///
/// Implements [`std::io::Write`]. Writes are buffered up to the configured chunk size;
/// `flush` forces the buffered bytes out. Each full chunk blocks until the connection has
/// room for it.
pub struct BodySink {
    tx: mpsc::Sender<ChunkResult>,
    buffer: BytesMut,
    chunk_size: usize,
    written: u64,
    finished: bool,
    failures: WriteFailureSlot,
}

impl BodySink {
    fn new(tx: mpsc::Sender<ChunkResult>, chunk_size: usize, failures: WriteFailureSlot) -> Self {
        BodySink {
            tx,
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
            written: 0,
            finished: false,
            failures,
        }
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        self.tx.blocking_send(Ok(chunk)).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "request body no longer accepted")
        })
    }

    fn finish(&mut self) -> io::Result<()> {
        self.send_buffered()?;
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self, reason: &str) {
        self.finished = true;
        self.failures.record(reason);
        self.buffer.clear();
        let _ = self
            .tx
            .blocking_send(Err(io::Error::other(reason.to_string())));
    }
}

impl Write for BodySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "request body already completed",
            ));
        }
        let room = self.chunk_size - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        self.written += n as u64;
        if self.buffer.len() >= self.chunk_size {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

impl Drop for BodySink {
    fn drop(&mut self) {
        // Reached without finish() only when the writer panicked.
        if !self.finished {
            self.abort("body writer did not complete");
        }
    }
}

/// Start a deferred writer on a blocking worker and return the body to stream.
pub(crate) fn spawn_writer(
    writer: Box<dyn crate::BodyWriter>,
    chunk_size: usize,
    capacity: usize,
    failures: WriteFailureSlot,
) -> reqwest::Body {
    let (tx, rx) = mpsc::channel::<ChunkResult>(capacity);
    tokio::task::spawn_blocking(move || {
        let mut sink = BodySink::new(tx, chunk_size, failures);
        match writer.write_to(&mut sink).and_then(|()| sink.finish()) {
            Ok(()) => tracing::trace!(bytes = sink.bytes_written(), "request body written"),
            Err(e) => {
                tracing::debug!(error = %e, "request body writer failed");
                sink.abort(&e.to_string());
            }
        }
    });
    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}

/// Spawn the pump that moves response body chunks from the connection into a
/// [`BodyStream`].
///
/// The pump owns the connection permit; it is released when the body completes, fails, or
/// the reader goes away.
pub(crate) fn spawn_pump(
    handle: &tokio::runtime::Handle,
    response: reqwest::Response,
    deadline: Option<Deadline>,
    permit: Option<OwnedSemaphorePermit>,
    capacity: usize,
) -> BodyStream {
    let (tx, rx) = mpsc::channel(capacity);
    handle.spawn(pump(response, tx, deadline, permit));
    BodyStream::live(rx)
}

async fn pump(
    response: reqwest::Response,
    tx: mpsc::Sender<BodyEvent>,
    deadline: Option<Deadline>,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let mut stream = response.bytes_stream();
    loop {
        let next = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline.at, stream.next())
                    .await
                    .map_err(|_| deadline.budget),
                None => Ok(stream.next().await),
            }
        };
        let event = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!("response body released before completion");
                return;
            }
            next = next => match next {
                Ok(Some(Ok(chunk))) if chunk.is_empty() => continue,
                Ok(Some(Ok(chunk))) => {
                    tracing::trace!(len = chunk.len(), "body chunk");
                    BodyEvent::Chunk(chunk)
                }
                Ok(Some(Err(e))) => BodyEvent::Failed(translate::body_error(e)),
                Ok(None) => BodyEvent::End,
                Err(budget) => BodyEvent::Failed(ProcessingError::timeout(budget)),
            },
        };
        let terminal = !matches!(event, BodyEvent::Chunk(_));
        if tx.send(event).await.is_err() || terminal {
            return;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    Finished,
    Failed(FailureKind),
}

/// Read side of a response body.
///
/// Every byte is delivered once: reads are destructive. Reading after the end yields
/// end-of-stream; a body cut short by the peer yields a
/// [`PrematureClose`](crate::FailureKind::PrematureClose) failure instead.
///
/// Blocking reads ([`Read`], [`collect_blocking`](Self::collect_blocking),
/// [`blocking_chunk`](Self::blocking_chunk)) must not be called from an async task; use
/// [`chunk`](Self::chunk), [`collect`](Self::collect) or the [`Stream`] impl there.
#[derive(Debug)]
pub struct BodyStream {
    events: Option<mpsc::Receiver<BodyEvent>>,
    current: Bytes,
    recording: Option<BytesMut>,
    state: ReadState,
}

impl BodyStream {
    pub(crate) fn live(events: mpsc::Receiver<BodyEvent>) -> Self {
        BodyStream {
            events: Some(events),
            current: Bytes::new(),
            recording: None,
            state: ReadState::Open,
        }
    }

    /// A fully buffered body.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        BodyStream {
            events: None,
            current: bytes.into(),
            recording: None,
            state: ReadState::Open,
        }
    }

    /// An empty, already complete body.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Whether the body is held in memory rather than fed by a connection.
    pub fn is_buffered(&self) -> bool {
        self.events.is_none()
    }

    /// Whether end-of-stream has been reached.
    pub fn is_finished(&self) -> bool {
        self.state == ReadState::Finished && self.current.is_empty()
    }

    /// Next chunk, suspending until one arrives. `None` at end-of-stream.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        poll_fn(|cx| self.poll_chunk(cx)).await
    }

    /// Next chunk, blocking the calling thread.
    pub fn blocking_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.blocking_fill()? {
            return Ok(None);
        }
        Ok(Some(self.deliver_all()))
    }

    /// Read the rest of the body into memory.
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    /// Read the rest of the body into memory, blocking the calling thread.
    pub fn collect_blocking(mut self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.blocking_chunk()? {
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<Bytes>>> {
        if !ready!(self.poll_fill(cx))? {
            return Poll::Ready(Ok(None));
        }
        Poll::Ready(Ok(Some(self.deliver_all())))
    }

    /// Make `current` non-empty. `Ok(false)` at end-of-stream.
    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<Result<bool>> {
        loop {
            if let Some(ready) = self.check_state() {
                return Poll::Ready(ready);
            }
            let event = match self.events.as_mut() {
                Some(events) => ready!(events.poll_recv(cx)),
                None => {
                    self.state = ReadState::Finished;
                    continue;
                }
            };
            self.accept(event)?;
        }
    }

    fn blocking_fill(&mut self) -> Result<bool> {
        loop {
            if let Some(ready) = self.check_state() {
                return ready;
            }
            let event = match self.events.as_mut() {
                Some(events) => events.blocking_recv(),
                None => {
                    self.state = ReadState::Finished;
                    continue;
                }
            };
            self.accept(event)?;
        }
    }

    fn check_state(&self) -> Option<Result<bool>> {
        if !self.current.is_empty() {
            return Some(Ok(true));
        }
        match self.state {
            ReadState::Open => None,
            ReadState::Finished => Some(Ok(false)),
            ReadState::Failed(kind) => Some(Err(ProcessingError::new(
                kind,
                "response body already failed",
            ))),
        }
    }

    fn accept(&mut self, event: Option<BodyEvent>) -> Result<()> {
        match event {
            Some(BodyEvent::Chunk(chunk)) => {
                self.current = chunk;
                Ok(())
            }
            Some(BodyEvent::End) => {
                self.finish_source();
                Ok(())
            }
            Some(BodyEvent::Failed(err)) => {
                self.state = ReadState::Failed(err.kind());
                self.events = None;
                Err(err)
            }
            None => {
                self.state = ReadState::Failed(FailureKind::PrematureClose);
                self.events = None;
                Err(ProcessingError::new(
                    FailureKind::PrematureClose,
                    "connection closed before the response body completed",
                ))
            }
        }
    }

    fn finish_source(&mut self) {
        self.state = ReadState::Finished;
        self.events = None;
    }

    fn deliver_all(&mut self) -> Bytes {
        let chunk = std::mem::take(&mut self.current);
        self.record(&chunk);
        chunk
    }

    fn record(&mut self, bytes: &[u8]) {
        if let Some(recording) = self.recording.as_mut() {
            recording.extend_from_slice(bytes);
        }
    }

    /// Start keeping a copy of everything read from now on.
    pub(crate) fn start_recording(&mut self) {
        self.recording = Some(BytesMut::new());
    }

    /// Stop recording and put the recorded bytes back in front of the unread remainder.
    pub(crate) fn replay_recorded(&mut self) {
        let Some(recorded) = self.recording.take() else {
            return;
        };
        if recorded.is_empty() {
            return;
        }
        let mut replay = recorded;
        replay.extend_from_slice(&self.current);
        self.current = replay.freeze();
    }
}

impl Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.blocking_fill().map_err(ProcessingError::into_io)? {
            return Ok(0);
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        if let Some(recording) = self.recording.as_mut() {
            recording.extend_from_slice(&self.current[..n]);
        }
        self.current.advance(n);
        Ok(n)
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_chunk(cx).map(Result::transpose)
    }
}
