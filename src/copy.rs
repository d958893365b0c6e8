//! Bounded streaming copy.
//!
//! [`copy_bounded`] moves bytes from an async source to an async sink while
//! enforcing a hard byte ceiling. The ceiling check runs after every chunk
//! write, so the copy aborts as soon as the budget is blown even when the
//! source still has data left; the caller owns discarding whatever sink
//! state the partial copy produced.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::UploadError;

/// Default chunk size for the copy loop.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Copy `src` into `dst`, failing with [`UploadError::FileTooLarge`] once
/// more than `max_bytes` bytes have been written.
///
/// Reads in fixed-size chunks; the chunk buffer shrinks to `max_bytes + 1`
/// when the ceiling is smaller than the default chunk, so tiny limits never
/// allocate a full 32 KiB. A sink that accepts zero bytes for a non-empty
/// chunk yields [`UploadError::InvalidWrite`]; one that accepts fewer bytes
/// than handed yields [`UploadError::ShortWrite`]. Both are fatal I/O
/// conditions distinct from the size ceiling. End-of-stream without error is
/// success and returns the byte count written.
pub async fn copy_bounded<S, D>(
    dst: &mut D,
    src: &mut S,
    max_bytes: u64,
) -> Result<u64, UploadError>
where
    S: AsyncRead + Unpin + ?Sized,
    D: AsyncWrite + Unpin + ?Sized,
{
    let cap = usize::try_from(max_bytes.saturating_add(1))
        .unwrap_or(DEFAULT_CHUNK_SIZE)
        .clamp(1, DEFAULT_CHUNK_SIZE);
    let mut buf = vec![0u8; cap];
    let mut written: u64 = 0;

    loop {
        let nr = src.read(&mut buf).await?;
        if nr == 0 {
            dst.flush().await?;
            return Ok(written);
        }
        let nw = dst.write(&buf[..nr]).await?;
        if nw == 0 {
            return Err(UploadError::InvalidWrite);
        }
        written += nw as u64;
        if nw < nr {
            return Err(UploadError::ShortWrite);
        }
        if written > max_bytes {
            return Err(UploadError::FileTooLarge);
        }
    }
}
