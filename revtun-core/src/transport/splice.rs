//! Bidirectional byte relay between two streams

use std::future::pending;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

pub const SPLICE_BUFFER_SIZE: usize = 64 * 1024;

/// Which side ended the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceEnd {
    /// Copying from `a` to `b` finished or failed first
    AToB,
    /// Copying from `b` to `a` finished or failed first
    BToA,
    /// Neither side moved data within the idle timeout
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
    pub end: SpliceEnd,
}

/// Copy `a -> b` and `b -> a` concurrently until either direction hits EOF
/// or an error. Both streams are dropped (and so closed) on return.
///
/// With `idle_timeout` set, the relay also ends once neither direction has
/// moved a byte for that long.
pub async fn splice<A, B>(a: A, b: B, idle_timeout: Option<Duration>) -> SpliceStats
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let start = Instant::now();
    let last_activity = AtomicU64::new(0);
    let mut a_to_b = 0u64;
    let mut b_to_a = 0u64;

    let end = {
        let forward = copy_half(&mut a_read, &mut b_write, &mut a_to_b, start, &last_activity);
        let backward = copy_half(&mut b_read, &mut a_write, &mut b_to_a, start, &last_activity);
        let idle = watch_idle(idle_timeout, start, &last_activity);

        tokio::select! {
            result = forward => {
                if let Err(e) = result {
                    debug!("splice a->b ended: {}", e);
                }
                SpliceEnd::AToB
            }
            result = backward => {
                if let Err(e) = result {
                    debug!("splice b->a ended: {}", e);
                }
                SpliceEnd::BToA
            }
            () = idle => SpliceEnd::Idle,
        }
    };

    SpliceStats {
        a_to_b,
        b_to_a,
        end,
    }
}

async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    copied: &mut u64,
    start: Instant,
    last_activity: &AtomicU64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; SPLICE_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
        last_activity.store(elapsed_millis(start), Ordering::Relaxed);
    }
}

async fn watch_idle(limit: Option<Duration>, start: Instant, last_activity: &AtomicU64) {
    let Some(limit) = limit else {
        return pending().await;
    };
    let mut check_at = start + limit;
    loop {
        tokio::time::sleep_until(check_at).await;
        let last = start + Duration::from_millis(last_activity.load(Ordering::Relaxed));
        let deadline = last + limit;
        if Instant::now() >= deadline {
            return;
        }
        check_at = deadline;
    }
}

fn elapsed_millis(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_relays_both_directions() {
        let (a, mut a_peer) = duplex(1024);
        let (b, mut b_peer) = duplex(1024);
        let relay = tokio::spawn(splice(a, b, None));

        a_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        b_peer.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        a_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(a_peer);
        let stats = relay.await.unwrap();
        assert_eq!(stats.a_to_b, 4);
        assert_eq!(stats.b_to_a, 5);
        assert_eq!(stats.end, SpliceEnd::AToB);
    }

    #[tokio::test]
    async fn test_one_side_closing_tears_down_both() {
        let (a, a_peer) = duplex(1024);
        let (b, mut b_peer) = duplex(1024);
        let relay = tokio::spawn(splice(a, b, None));

        drop(a_peer);
        relay.await.unwrap();

        let mut buf = Vec::new();
        let n = b_peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_relay() {
        let (a, _a_peer) = duplex(1024);
        let (b, _b_peer) = duplex(1024);

        let stats = tokio::time::timeout(
            Duration::from_secs(2),
            splice(a, b, Some(Duration::from_millis(50))),
        )
        .await
        .unwrap();
        assert_eq!(stats.end, SpliceEnd::Idle);
        assert_eq!(stats.a_to_b + stats.b_to_a, 0);
    }
}
