//! Stream receiver.
//!
//! Accepts one attempt per connection and writes its slice into a file under
//! the base directory at the slice's offset, so a resumed upload continues
//! the same file.

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::STREAM_BUFFER_SIZE;
use crate::error::DataChannelError;
use crate::wire::{read_header, write_ack};

/// Outcome of one received attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub target: String,
    pub offset: u64,
    /// Slice bytes written to disk.
    pub bytes: u64,
    /// `false` if the sender went away before the end of the slice.
    pub complete: bool,
}

/// Receives upload attempts into files below `base_path`.
#[derive(Debug, Clone)]
pub struct StreamReceiver {
    base_path: PathBuf,
    cancel: CancellationToken,
}

impl StreamReceiver {
    pub fn new(base_path: PathBuf, cancel: CancellationToken) -> Self {
        Self { base_path, cancel }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Binds a TCP listener on `addr` and returns the bound address with it.
    pub async fn listen(&self, addr: &str) -> Result<(SocketAddr, TcpListener), DataChannelError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(%local, "stream receiver listening");
        Ok((local, listener))
    }

    /// Accepts connections until cancelled, one task per connection.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), DataChannelError> {
        loop {
            let (stream, addr) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("stream receiver stopped");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };
            debug!(%addr, "stream connection accepted");

            let receiver = self.clone();
            tokio::spawn(async move {
                match receiver.receive(stream).await {
                    Ok(received) => debug!(
                        %addr,
                        path = %received.target,
                        bytes = received.bytes,
                        complete = received.complete,
                        "attempt received"
                    ),
                    Err(e) => warn!(%addr, error = %e, "attempt failed"),
                }
            });
        }
    }

    /// Receives a single attempt from `stream`.
    ///
    /// The acknowledgement is only sent once the whole slice is on disk. An
    /// invalid target is answered with a rejection.
    pub async fn receive<S>(&self, mut stream: S) -> Result<Received, DataChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let header = read_header(&mut stream).await?;

        if let Err(e) = validate_upload_path(&header.target) {
            warn!(path = %header.target, "rejecting upload target");
            write_ack(&mut stream, false).await?;
            return Err(e);
        }

        let file_path = self.base_path.join(&header.target);
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&file_path)
            .await?;
        file.seek(SeekFrom::Start(header.offset)).await?;

        let mut remaining = header.length;
        let mut written: u64 = 0;
        let mut buf = vec![0u8; STREAM_BUFFER_SIZE];

        while remaining > 0 {
            if self.cancel.is_cancelled() {
                file.flush().await?;
                return Err(DataChannelError::Cancelled);
            }

            let to_read = remaining.min(buf.len() as u64) as usize;
            let n = stream.read(&mut buf[..to_read]).await?;
            if n == 0 {
                break;
            }

            file.write_all(&buf[..n]).await?;
            remaining -= n as u64;
            written += n as u64;
        }
        file.flush().await?;

        let complete = remaining == 0;
        if complete {
            if header.offset + header.length == header.total_size {
                file.set_len(header.total_size).await?;
            }
            write_ack(&mut stream, true).await?;
            info!(
                path = %header.target,
                offset = header.offset,
                bytes = written,
                "slice stored"
            );
        } else {
            debug!(
                path = %header.target,
                offset = header.offset,
                bytes = written,
                missing = remaining,
                "sender disconnected mid-slice"
            );
        }

        Ok(Received {
            target: header.target,
            offset: header.offset,
            bytes: written,
            complete,
        })
    }
}

/// Validates a relative file path (no traversal, no absolute paths).
fn validate_upload_path(path: &str) -> Result<(), DataChannelError> {
    if path.is_empty() {
        return Err(DataChannelError::InvalidPath("empty path".into()));
    }

    if Path::new(path).is_absolute() {
        return Err(DataChannelError::InvalidPath(format!(
            "absolute path not allowed: {path}"
        )));
    }

    if Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(DataChannelError::InvalidPath(format!(
            "parent traversal not allowed: {path}"
        )));
    }

    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(DataChannelError::InvalidPath(format!(
            "Windows drive prefix not allowed: {path}"
        )));
    }
    if path.starts_with("\\\\") {
        return Err(DataChannelError::InvalidPath(format!(
            "UNC path not allowed: {path}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{UploadHeader, read_ack, write_header};

    fn receiver(dir: &Path) -> StreamReceiver {
        StreamReceiver::new(dir.to_path_buf(), CancellationToken::new())
    }

    async fn send(
        receiver: &StreamReceiver,
        header: UploadHeader,
        body: &[u8],
    ) -> (Result<Received, DataChannelError>, Option<bool>) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        write_header(&mut client, &header).await.unwrap();
        client.write_all(body).await.unwrap();
        client.shutdown().await.unwrap();

        let result = receiver.receive(server).await;
        let ack = read_ack(&mut client).await.ok();
        (result, ack)
    }

    fn header(target: &str, offset: u64, length: u64, total_size: u64) -> UploadHeader {
        UploadHeader {
            target: target.into(),
            offset,
            length,
            total_size,
            content_type: None,
        }
    }

    #[test]
    fn validate_path_rejects_empty() {
        assert!(validate_upload_path("").is_err());
    }

    #[test]
    fn validate_path_rejects_absolute() {
        assert!(validate_upload_path("/etc/passwd").is_err());
    }

    #[test]
    fn validate_path_rejects_parent_traversal() {
        assert!(validate_upload_path("../secret").is_err());
        assert!(validate_upload_path("a/../../etc").is_err());
    }

    #[test]
    fn validate_path_rejects_windows_prefixes() {
        assert!(validate_upload_path("C:\\Windows").is_err());
        assert!(validate_upload_path("\\\\server\\share").is_err());
    }

    #[test]
    fn validate_path_allows_normal() {
        assert!(validate_upload_path("upload.bin").is_ok());
        assert!(validate_upload_path("videos/2024/a.mp4").is_ok());
        assert!(validate_upload_path("./upload.bin").is_ok());
    }

    #[tokio::test]
    async fn slices_are_written_at_their_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();

        let (first, ack) = send(&rx, header("f.bin", 0, 1000, 1000), &data[..400]).await;
        let first = first.unwrap();
        assert!(!first.complete);
        assert_eq!(first.bytes, 400);
        assert_eq!(ack, None);

        let (second, ack) = send(&rx, header("f.bin", 400, 600, 1000), &data[400..]).await;
        let second = second.unwrap();
        assert!(second.complete);
        assert_eq!(second.offset, 400);
        assert_eq!(second.bytes, 600);
        assert_eq!(ack, Some(true));

        assert_eq!(std::fs::read(dir.path().join("f.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn restart_from_zero_truncates_stale_tail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), vec![9u8; 50]).unwrap();
        let rx = receiver(dir.path());

        let (result, ack) = send(&rx, header("f.bin", 0, 10, 10), &[1u8; 10]).await;
        assert!(result.unwrap().complete);
        assert_eq!(ack, Some(true));
        assert_eq!(std::fs::read(dir.path().join("f.bin")).unwrap(), vec![1u8; 10]);
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());

        let (result, _) = send(&rx, header("a/b/c.txt", 0, 3, 3), b"abc").await;
        assert!(result.unwrap().complete);
        assert_eq!(std::fs::read(dir.path().join("a/b/c.txt")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn traversal_is_rejected_with_ack() {
        let dir = tempfile::tempdir().unwrap();
        let rx = receiver(dir.path());

        let (result, ack) = send(&rx, header("../x.bin", 0, 3, 3), b"abc").await;
        assert!(matches!(result, Err(DataChannelError::InvalidPath(_))));
        assert_eq!(ack, Some(false));
    }

    #[tokio::test]
    async fn cancelled_receiver_stops() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let rx = StreamReceiver::new(dir.path().to_path_buf(), cancel.clone());
        cancel.cancel();

        let (result, _) = send(&rx, header("f.bin", 0, 3, 3), b"abc").await;
        assert!(matches!(result, Err(DataChannelError::Cancelled)));
    }

    #[tokio::test]
    async fn serve_returns_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let rx = StreamReceiver::new(dir.path().to_path_buf(), cancel.clone());
        let (_, listener) = rx.listen("127.0.0.1:0").await.unwrap();

        cancel.cancel();
        assert!(rx.serve(listener).await.is_ok());
    }
}
