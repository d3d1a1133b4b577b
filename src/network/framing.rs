use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one frame's payload; anything larger is a protocol
/// violation, not a legitimate packet.
pub const MAX_FRAME_LEN: usize = 4096;

const LEN_DIGITS: usize = 4;

/// Write one frame: a 4-digit ASCII decimal length followed by the
/// UTF-8 payload.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame payload of {} bytes exceeds the limit", payload.len()),
        ));
    }
    let header = format!("{:0width$}", payload.len(), width = LEN_DIGITS);
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await
}

/// Read one frame. `Ok(None)` is a clean end-of-stream at a frame
/// boundary; a malformed length prefix or truncated payload is an error.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LEN_DIGITS];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut len = 0usize;
    for b in header {
        if !b.is_ascii_digit() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame length prefix is not decimal",
            ));
        }
        len = len * 10 + (b - b'0') as usize;
    }
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame length exceeds the limit",
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    String::from_utf8(payload)
        .map(Some)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame payload is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(256);
        write_frame(&mut client, "MOVE 3 7").await.unwrap();
        write_frame(&mut client, "").await.unwrap();

        assert_eq!(
            read_frame(&mut server).await.unwrap(),
            Some("MOVE 3 7".to_string())
        );
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(String::new()));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (client, mut server) = tokio::io::duplex(256);
        drop(client);
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_length_prefix_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(256);
        use tokio::io::AsyncWriteExt;
        client.write_all(b"12x4rest").await.unwrap();
        assert!(read_frame(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn oversized_payload_is_refused_on_write() {
        let (mut client, _server) = tokio::io::duplex(16);
        let big = "a".repeat(MAX_FRAME_LEN + 1);
        assert!(write_frame(&mut client, &big).await.is_err());
    }
}
