//! Wire format for one upload attempt.
//!
//! # Wire format
//!
//! ```text
//! PER ATTEMPT (sender -> receiver):
//!   [2 bytes BE: target_len]
//!   [target_len bytes: target path UTF-8]
//!   [8 bytes BE: offset]
//!   [8 bytes BE: length]
//!   [8 bytes BE: total_size]
//!   [2 bytes BE: content_type_len]   (0 = none)
//!   [content_type_len bytes: content type UTF-8]
//!   [length bytes: raw payload slice]
//!
//! ACK (receiver -> sender), after the last byte:
//!   [1 byte: 0x01=OK, 0x00=rejected]
//! ```
//!
//! One connection carries exactly one attempt.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DataChannelError;

/// Acknowledgement: slice stored.
pub const ACK_OK: u8 = 0x01;

/// Acknowledgement: slice rejected.
pub const ACK_REJECTED: u8 = 0x00;

/// Header preceding the slice bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHeader {
    /// Target path on the receiver (UTF-8, forward slashes).
    pub target: String,
    /// Position of the slice within the payload.
    pub offset: u64,
    /// Number of slice bytes that follow.
    pub length: u64,
    /// Size of the whole payload.
    pub total_size: u64,
    pub content_type: Option<String>,
}

fn encode_str_u16<'a>(value: &'a str, what: &str) -> Result<(u16, &'a [u8]), DataChannelError> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| {
        DataChannelError::Protocol(format!(
            "{what} too long: {} bytes (max {})",
            bytes.len(),
            u16::MAX
        ))
    })?;
    Ok((len, bytes))
}

async fn read_str_u16<R: AsyncRead + Unpin>(
    reader: &mut R,
    what: &str,
) -> Result<String, DataChannelError> {
    let len = reader.read_u16().await?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| DataChannelError::Protocol(format!("invalid UTF-8 {what}: {e}")))
}

/// Writes an upload header to the stream.
pub async fn write_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &UploadHeader,
) -> Result<(), DataChannelError> {
    if header.offset.checked_add(header.length).is_none_or(|end| end > header.total_size) {
        return Err(DataChannelError::Protocol(format!(
            "range {}+{} exceeds total size {}",
            header.offset, header.length, header.total_size
        )));
    }

    let (target_len, target) = encode_str_u16(&header.target, "target")?;
    let (ct_len, ct) = encode_str_u16(header.content_type.as_deref().unwrap_or(""), "content type")?;

    writer.write_u16(target_len).await?;
    writer.write_all(target).await?;
    writer.write_u64(header.offset).await?;
    writer.write_u64(header.length).await?;
    writer.write_u64(header.total_size).await?;
    writer.write_u16(ct_len).await?;
    writer.write_all(ct).await?;
    Ok(())
}

/// Reads an upload header from the stream.
pub async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<UploadHeader, DataChannelError> {
    let target = read_str_u16(reader, "target").await?;
    let offset = reader.read_u64().await?;
    let length = reader.read_u64().await?;
    let total_size = reader.read_u64().await?;
    let content_type = read_str_u16(reader, "content type").await?;

    if offset.checked_add(length).is_none_or(|end| end > total_size) {
        return Err(DataChannelError::Protocol(format!(
            "range {offset}+{length} exceeds total size {total_size}"
        )));
    }

    Ok(UploadHeader {
        target,
        offset,
        length,
        total_size,
        content_type: (!content_type.is_empty()).then_some(content_type),
    })
}

/// Writes the acknowledgement byte.
pub async fn write_ack<W: AsyncWrite + Unpin>(
    writer: &mut W,
    accepted: bool,
) -> Result<(), DataChannelError> {
    writer
        .write_u8(if accepted { ACK_OK } else { ACK_REJECTED })
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the acknowledgement byte.
pub async fn read_ack<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool, DataChannelError> {
    let byte = reader.read_u8().await?;
    Ok(byte == ACK_OK)
}
