//! The radio link and the background loops that move bytes over it.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A point-to-point radio link to one pump.
///
/// The stack treats the link as an opaque duplex byte stream once opened.
pub trait Link: Send + Sync + 'static {
    /// The duplex stream returned by [`Link::open`].
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Returns true if the radio is powered.
    fn is_radio_enabled(&self) -> bool;

    /// Power the radio. Resolves to `false` if it did not come up.
    fn enable_radio(&self) -> impl Future<Output = io::Result<bool>> + Send;

    /// Open a new stream to the pump.
    fn open(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// What the read loop observed.
#[derive(Debug)]
pub enum LinkEvent {
    /// Bytes arrived.
    Received(Vec<u8>),
    /// The stream failed or reached end of stream.
    Failed(Option<io::Error>),
}

/// Read chunks from `reader` until it fails.
///
/// `on_event` returns `false` once nobody listens anymore, which ends the
/// loop.
pub async fn read_loop<R, F>(mut reader: R, chunk_size: usize, mut on_event: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(LinkEvent) -> bool,
{
    let mut chunk = vec![0u8; chunk_size];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("link reached end of stream");
                on_event(LinkEvent::Failed(None));
                return;
            }
            Ok(n) => {
                if !on_event(LinkEvent::Received(chunk[..n].to_vec())) {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "link read failed");
                on_event(LinkEvent::Failed(Some(e)));
                return;
            }
        }
    }
}

/// Write queued packets to `writer` in order, flushing after each one.
///
/// Ends when the queue closes or a write fails; failures go to `on_error`.
pub async fn write_loop<W, F>(mut writer: W, mut packets: mpsc::UnboundedReceiver<Vec<u8>>, on_error: F)
where
    W: AsyncWrite + Unpin,
    F: FnOnce(io::Error),
{
    while let Some(packet) = packets.recv().await {
        let result = async {
            writer.write_all(&packet).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "link write failed");
            on_error(e);
            return;
        }
    }
}
