//! Serialised writer for a control channel
//!
//! All control frames for one socket go through a single kanal queue, so the
//! socket is never written from two tasks at once. Frames that are already
//! queued are coalesced into one write.

use bytes::{Bytes, BytesMut};
use kanal::AsyncReceiver;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

const MAX_BATCH_FRAMES: usize = 32;

/// Drain `rx` into `writer` until the queue closes (`None`) or a write
/// fails or exceeds `write_timeout` (`Some(error)`).
pub async fn run_control_writer<W>(
    rx: AsyncReceiver<Bytes>,
    mut writer: W,
    write_timeout: Duration,
) -> Option<io::Error>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = BytesMut::new();
    loop {
        let Ok(first) = rx.recv().await else {
            return None;
        };
        batch.clear();
        batch.extend_from_slice(&first);

        let mut frames = 1;
        while frames < MAX_BATCH_FRAMES {
            match rx.try_recv() {
                Ok(Some(next)) => {
                    batch.extend_from_slice(&next);
                    frames += 1;
                }
                _ => break,
            }
        }

        match timeout(write_timeout, writer.write_all(&batch)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Some(e),
            Err(_) => {
                return Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("control write exceeded {write_timeout:?}"),
                ))
            }
        }
    }
}
