use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 8192;

/// Reads `reader` to EOF, keeping at most `limit` bytes
///
/// Bytes past the limit are read and dropped so the writer never blocks on a
/// full pipe.
pub(super) async fn read_capped<R>(mut reader: R, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut dropped: u64 = 0;
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let take = n.min(room);
        kept.extend_from_slice(&chunk[..take]);
        dropped += (n - take) as u64;
    }

    if dropped > 0 {
        log::debug!("Output capture limit reached, dropped {dropped} bytes");
    }
    Ok(kept)
}
