//! Length-prefixed modified-UTF-8 frames.
//!
//! Every message occupies one frame:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────┐
//! │ len: u16 (BE)│ len bytes of modified UTF-8 text │
//! └──────────────┴──────────────────────────────────┘
//! ```
//!
//! Modified UTF-8 differs from standard UTF-8 in two places: U+0000 is
//! written as the two bytes `C0 80`, and characters outside the BMP are
//! written as a UTF-16 surrogate pair, each half in three bytes. This
//! keeps frames byte-compatible with `DataOutput.writeUTF` peers.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Largest payload a frame can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Encodes `text` as modified UTF-8.
pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        let cp = c as u32;
        match cp {
            0x01..=0x7F => out.push(cp as u8),
            0x00 | 0x80..=0x7FF => push_two(&mut out, cp),
            0x800..=0xFFFF => push_three(&mut out, cp),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    push_three(&mut out, u32::from(*unit));
                }
            }
        }
    }
    out
}

fn push_two(out: &mut Vec<u8>, cp: u32) {
    out.push(0xC0 | ((cp >> 6) & 0x1F) as u8);
    out.push(0x80 | (cp & 0x3F) as u8);
}

fn push_three(out: &mut Vec<u8>, cp: u32) {
    out.push(0xE0 | ((cp >> 12) & 0x0F) as u8);
    out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
    out.push(0x80 | (cp & 0x3F) as u8);
}

/// Decodes modified UTF-8 back into a `String`.
///
/// # Errors
/// [`TransportError::MalformedFrame`] on truncated sequences, bad
/// continuation bytes, 4-byte sequences, or unpaired surrogates.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, TransportError> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(u16::from(b));
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = continuation(bytes, i, 1)?;
            units.push((u16::from(b & 0x1F) << 6) | u16::from(b2 & 0x3F));
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = continuation(bytes, i, 1)?;
            let b3 = continuation(bytes, i, 2)?;
            units.push(
                (u16::from(b & 0x0F) << 12)
                    | (u16::from(b2 & 0x3F) << 6)
                    | u16::from(b3 & 0x3F),
            );
            i += 3;
        } else {
            return Err(TransportError::MalformedFrame(format!(
                "malformed input around byte {i}"
            )));
        }
    }

    String::from_utf16(&units)
        .map_err(|e| TransportError::MalformedFrame(e.to_string()))
}

fn continuation(bytes: &[u8], start: usize, offset: usize) -> Result<u8, TransportError> {
    match bytes.get(start + offset) {
        Some(b) if b & 0xC0 == 0x80 => Ok(*b),
        Some(_) => Err(TransportError::MalformedFrame(format!(
            "malformed input around byte {}",
            start + offset
        ))),
        None => Err(TransportError::MalformedFrame(
            "partial character at end of input".into(),
        )),
    }
}

/// Reads one frame and returns its text.
///
/// End of stream (before or inside a frame) maps to
/// [`TransportError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader.read_u16().await.map_err(read_error)?;
    let mut payload = vec![0u8; usize::from(len)];
    reader.read_exact(&mut payload).await.map_err(read_error)?;
    decode_modified_utf8(&payload)
}

/// Writes `text` as one frame and flushes.
pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload = encode_modified_utf8(text);
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }

    // One buffer so header and payload go out in a single write.
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(&payload);

    writer
        .write_all(&frame)
        .await
        .map_err(TransportError::SendFailed)?;
    writer.flush().await.map_err(TransportError::SendFailed)
}

fn read_error(e: std::io::Error) -> TransportError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::ConnectionClosed("end of stream".into())
    } else {
        TransportError::ReceiveFailed(e)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_ascii_is_unchanged() {
        assert_eq!(encode_modified_utf8("hello"), b"hello");
    }

    #[test]
    fn test_nul_uses_two_bytes() {
        assert_eq!(encode_modified_utf8("a\0b"), [b'a', 0xC0, 0x80, b'b']);
    }

    #[test]
    fn test_bmp_matches_standard_utf8() {
        let text = "héllo €";
        assert_eq!(encode_modified_utf8(text), text.as_bytes());
    }

    #[test]
    fn test_supplementary_char_uses_surrogate_pair() {
        // U+1F30D (🌍) = D83C DF0D in UTF-16.
        let bytes = encode_modified_utf8("🌍");
        assert_eq!(bytes, [0xED, 0xA0, 0xBC, 0xED, 0xBC, 0x8D]);
        assert_eq!(decode_modified_utf8(&bytes).unwrap(), "🌍");
    }

    #[test]
    fn test_decode_accepts_raw_nul() {
        assert_eq!(decode_modified_utf8(&[b'x', 0x00]).unwrap(), "x\0");
    }

    #[test]
    fn test_decode_rejects_four_byte_sequences() {
        let res = decode_modified_utf8("🌍".as_bytes());
        assert!(matches!(res, Err(TransportError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_sequence() {
        let res = decode_modified_utf8(&[0xE2, 0x82]);
        assert!(matches!(res, Err(TransportError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_rejects_unpaired_surrogate() {
        let res = decode_modified_utf8(&[0xED, 0xA0, 0xBC]);
        assert!(matches!(res, Err(TransportError::MalformedFrame(_))));
    }

    #[tokio::test]
    async fn test_frame_header_is_big_endian_length() {
        let mut out = Vec::new();
        write_frame(&mut out, "{}").await.unwrap();
        assert_eq!(out, [0x00, 0x02, b'{', b'}']);
    }

    #[tokio::test]
    async fn test_read_frame_reads_exactly_one_frame() {
        let mut out = Vec::new();
        write_frame(&mut out, "first").await.unwrap();
        write_frame(&mut out, "second").await.unwrap();

        let mut cursor = Cursor::new(out);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), "first");
        assert_eq!(read_frame(&mut cursor).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_read_frame_at_eof_is_connection_closed() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_connection_closed() {
        let mut cursor = Cursor::new(vec![0x00, 0x05, b'a', b'b']);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let text = "x".repeat(MAX_FRAME_LEN + 1);
        let mut out = Vec::new();
        let err = write_frame(&mut out, &text).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge(n) if n == MAX_FRAME_LEN + 1));
        assert!(out.is_empty());
    }
}
