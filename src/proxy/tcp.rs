//! TCP tunnel with backpressure
//!
//! Forwards bytes between the client socket and the upstream socket after a
//! successful CONNECT. The teacher's `TcpProxy` joins two plain copy loops
//! with no backpressure, because its QUIC stream already flow-controls; a
//! TCP-to-TCP tunnel has no such built-in limiter, so each direction here is
//! split into a reader task and a writer task connected by a channel, with
//! an explicit byte-count watermark pausing the reader once too much data is
//! in flight. Four subtasks total (two readers, two writers) are
//! coordinated by one `CancellationToken`: the first to see EOF or a
//! non-cancel error cancels the other three.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pool::{BufferPool, BufferSize};

const PAUSE_THRESHOLD: u64 = 64 * 1024;
const RESUME_THRESHOLD: u64 = 32 * 1024;
const MIN_READ_SEGMENT: usize = BufferSize::Small as usize;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tracks bytes in flight for one direction and wakes the paused reader once
/// the writer has drained enough of them.
struct Watermark {
    pending: AtomicU64,
    notify: Notify,
}

impl Watermark {
    fn new() -> Self {
        Self {
            pending: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn add(&self, n: u64) {
        self.pending.fetch_add(n, Ordering::AcqRel);
    }

    fn sub(&self, n: u64) {
        let new = self.pending.fetch_sub(n, Ordering::AcqRel) - n;
        if new <= RESUME_THRESHOLD {
            self.notify.notify_waiters();
        }
    }

    async fn wait_until_not_paused(&self) {
        loop {
            // Register interest before re-checking the condition: `notified()`
            // snapshots the notify-waiters generation at creation time, so a
            // `notify_waiters()` call racing between the `load` below and the
            // `.await` is still observed. Checking first and calling
            // `notified()` only on the slow path would lose exactly that
            // notification and hang the reader forever.
            let notified = self.notify.notified();
            if self.pending.load(Ordering::Acquire) < PAUSE_THRESHOLD {
                return;
            }
            notified.await;
        }
    }
}

/// Run the tunnel to completion: forward in both directions until either
/// side closes or errors, then wait (bounded by a grace timeout) for the
/// other direction to wind down. Returns (client_to_upstream_bytes,
/// upstream_to_client_bytes).
pub async fn run_tunnel(
    client: TcpStream,
    upstream: TcpStream,
    buffer_pool: BufferPool,
    cancel: CancellationToken,
) -> (u64, u64) {
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let c2u_watermark = Arc::new(Watermark::new());
    let u2c_watermark = Arc::new(Watermark::new());

    let c2u_count = Arc::new(AtomicU64::new(0));
    let u2c_count = Arc::new(AtomicU64::new(0));

    let (c2u_tx, c2u_rx) = mpsc::channel(32);
    let (u2c_tx, u2c_rx) = mpsc::channel(32);

    let cancel_handle = cancel.clone();

    let mut reader_c2u = tokio::spawn(pump_reader(
        client_read,
        c2u_tx,
        buffer_pool.clone(),
        c2u_watermark.clone(),
        cancel.clone(),
    ));
    let mut writer_c2u = tokio::spawn(pump_writer(
        upstream_write,
        c2u_rx,
        c2u_watermark,
        c2u_count.clone(),
        cancel.clone(),
    ));
    let mut reader_u2c = tokio::spawn(pump_reader(
        upstream_read,
        u2c_tx,
        buffer_pool,
        u2c_watermark.clone(),
        cancel.clone(),
    ));
    let mut writer_u2c = tokio::spawn(pump_writer(
        client_write,
        u2c_rx,
        u2c_watermark,
        u2c_count.clone(),
        cancel,
    ));

    let joined = tokio::time::timeout(
        SHUTDOWN_GRACE,
        futures_join(&mut reader_c2u, &mut writer_c2u, &mut reader_u2c, &mut writer_u2c),
    )
    .await;

    if joined.is_err() {
        debug!("tunnel subtasks did not finish within the shutdown grace window, forcing closure");
        cancel_handle.cancel();
        reader_c2u.abort();
        writer_c2u.abort();
        reader_u2c.abort();
        writer_u2c.abort();
    }

    (
        c2u_count.load(Ordering::Acquire),
        u2c_count.load(Ordering::Acquire),
    )
}

async fn futures_join(
    a: &mut tokio::task::JoinHandle<()>,
    b: &mut tokio::task::JoinHandle<()>,
    c: &mut tokio::task::JoinHandle<()>,
    d: &mut tokio::task::JoinHandle<()>,
) {
    let _ = tokio::join!(a, b, c, d);
}

/// Reads a segment at a time (floor `MIN_READ_SEGMENT`) and hands it to the
/// writer task. Pauses before each read once the direction's watermark is
/// over the pause threshold. EOF or a read error cancels the shared token;
/// the cancellation itself is not reported as an error.
async fn pump_reader<R>(
    mut reader: ReadHalf<R>,
    tx: mpsc::Sender<(crate::pool::Buffer, usize)>,
    buffer_pool: BufferPool,
    watermark: Arc<Watermark>,
    cancel: CancellationToken,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    loop {
        watermark.wait_until_not_paused().await;

        let mut buf = buffer_pool.acquire_or_alloc(BufferSize::Medium);
        debug_assert!(buf.capacity() >= MIN_READ_SEGMENT);

        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    cancel.cancel();
                    break;
                }
                Ok(n) => n,
                Err(_) => {
                    cancel.cancel();
                    break;
                }
            },
        };

        watermark.add(n as u64);
        if tx.send((buf, n)).await.is_err() {
            break;
        }
    }
}

async fn pump_writer<W>(
    mut writer: WriteHalf<W>,
    mut rx: mpsc::Receiver<(crate::pool::Buffer, usize)>,
    watermark: Arc<Watermark>,
    total: Arc<AtomicU64>,
    cancel: CancellationToken,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        let (buf, n) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = write_segment(&mut writer, &buf, n, &total, &watermark) => {
                if result.is_err() {
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    // `cancel` is shared across both directions, so it may have fired because
    // the *other* direction's reader hit EOF, not this one's. Anything still
    // sitting in `rx` was already read successfully from this direction's
    // source and is owed to its destination; flush it before closing, bounded
    // by the caller's overall shutdown grace timeout rather than a timeout
    // here.
    while let Ok((buf, n)) = rx.try_recv() {
        if write_segment(&mut writer, &buf, n, &total, &watermark)
            .await
            .is_err()
        {
            break;
        }
    }

    let _ = writer.shutdown().await;
}

async fn write_segment<W>(
    writer: &mut WriteHalf<W>,
    buf: &crate::pool::Buffer,
    n: usize,
    total: &AtomicU64,
    watermark: &Watermark,
) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer.write_all(&buf[..n]).await?;
    total.fetch_add(n as u64, Ordering::Relaxed);
    watermark.sub(n as u64);
    Ok(())
}
