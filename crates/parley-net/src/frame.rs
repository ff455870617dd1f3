//! STOMP 1.2 frames and their byte codec.
//!
//! ```text
//! COMMAND\n
//! key:value\n        (repeated; first occurrence of a key wins)
//! \n
//! body               (content-length bytes, or up to the first NUL)
//! \0
//! ```
//!
//! A bare EOL between frames is a heart-beat.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use parley_shared::constants::MAX_FRAME_SIZE;

use crate::error::TransportError;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl StompFrame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is(&self, command: &str) -> bool {
        self.command == command
    }

    /// CONNECT and CONNECTED carry raw header values.
    fn escapes_headers(&self) -> bool {
        !matches!(self.command.as_str(), "CONNECT" | "CONNECTED")
    }
}

/// One decoded unit off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    Heartbeat,
    Frame(StompFrame),
}

// ---------------------------------------------------------------------------
// Heart-beat negotiation
// ---------------------------------------------------------------------------

/// Negotiated heart-beat intervals. `None` means disabled in that direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    /// How often we must send something.
    pub send: Option<Duration>,
    /// How often the server promised to send something.
    pub receive: Option<Duration>,
}

impl Heartbeat {
    /// Combine our `heart-beat` offer `(cx, cy)` with the server's
    /// CONNECTED header `sx,sy`.
    pub fn negotiate(client: (u64, u64), server: Option<&str>) -> Result<Self, TransportError> {
        let (cx, cy) = client;
        let (sx, sy) = match server {
            Some(raw) => parse_heartbeat(raw)?,
            None => (0, 0),
        };
        let pick = |ours: u64, theirs: u64| {
            (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
        };
        Ok(Self {
            send: pick(cx, sy),
            receive: pick(cy, sx),
        })
    }
}

fn parse_heartbeat(raw: &str) -> Result<(u64, u64), TransportError> {
    let bad = || TransportError::Frame(format!("invalid heart-beat header {raw:?}"));
    let (a, b) = raw.split_once(',').ok_or_else(bad)?;
    let a = a.trim().parse().map_err(|_| bad())?;
    let b = b.trim().parse().map_err(|_| bad())?;
    Ok((a, b))
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StompCodec {
    max_frame_size: usize,
}

impl StompCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    fn too_large(&self) -> TransportError {
        TransportError::FrameTooLarge {
            limit: self.max_frame_size,
        }
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

/// Position just past the next `\n` at or after `from`, and the line
/// content with any trailing `\r` removed.
fn next_line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let rel = buf[from..].iter().position(|&b| b == b'\n')?;
    let end = from + rel;
    let line = &buf[from..end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, end + 1))
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StompItem>, TransportError> {
        // Heart-beats.
        if src.first() == Some(&b'\n') {
            src.advance(1);
            return Ok(Some(StompItem::Heartbeat));
        }
        if src.starts_with(b"\r\n") {
            src.advance(2);
            return Ok(Some(StompItem::Heartbeat));
        }
        if src.is_empty() || src[..] == b"\r"[..] {
            return Ok(None);
        }

        // Command and headers.
        let Some((command, mut pos)) = next_line(src, 0) else {
            return self.need_more(src.len());
        };
        let command = utf8(command)?.to_string();
        let mut frame = StompFrame::new(&command);
        loop {
            let Some((line, next)) = next_line(src, pos) else {
                return self.need_more(src.len());
            };
            pos = next;
            if line.is_empty() {
                break;
            }
            let line = utf8(line)?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| TransportError::Frame(format!("header without colon: {line:?}")))?;
            if frame.escapes_headers() {
                frame.headers.push((unescape(name)?, unescape(value)?));
            } else {
                frame.headers.push((name.to_string(), value.to_string()));
            }
        }
        let body_start = pos;

        // Body.
        let body_len = match frame.header("content-length") {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| TransportError::Frame(format!("bad content-length {raw:?}")))?;
                if len > self.max_frame_size {
                    return Err(self.too_large());
                }
                if src.len() < body_start + len + 1 {
                    return self.need_more(body_start + len + 1);
                }
                if src[body_start + len] != 0 {
                    return Err(TransportError::Frame("missing NUL after body".into()));
                }
                len
            }
            None => match src[body_start..].iter().position(|&b| b == 0) {
                Some(len) => len,
                None => return self.need_more(src.len()),
            },
        };

        let total = body_start + body_len + 1;
        if total > self.max_frame_size {
            return Err(self.too_large());
        }

        let mut raw = src.split_to(total);
        raw.advance(body_start);
        raw.truncate(body_len);
        frame.body = raw.freeze();
        Ok(Some(StompItem::Frame(frame)))
    }
}

impl StompCodec {
    /// An incomplete frame: wait for more bytes unless it is already over
    /// the size limit.
    fn need_more(&self, buffered: usize) -> Result<Option<StompItem>, TransportError> {
        if buffered > self.max_frame_size {
            Err(self.too_large())
        } else {
            Ok(None)
        }
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = TransportError;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), TransportError> {
        let frame = match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(frame) => frame,
        };

        let start = dst.len();
        dst.put_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');
        let escaped = frame.escapes_headers();
        for (name, value) in &frame.headers {
            if escaped {
                dst.put_slice(escape(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        if !frame.body.is_empty() && frame.header("content-length").is_none() {
            dst.put_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);

        if dst.len() - start > self.max_frame_size {
            dst.truncate(start);
            return Err(self.too_large());
        }
        Ok(())
    }
}

impl Encoder<StompFrame> for StompCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: StompFrame, dst: &mut BytesMut) -> Result<(), TransportError> {
        Encoder::<StompItem>::encode(self, StompItem::Frame(frame), dst)
    }
}

fn utf8(raw: &[u8]) -> Result<&str, TransportError> {
    std::str::from_utf8(raw).map_err(|_| TransportError::Frame("header is not UTF-8".into()))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(raw: &str) -> Result<String, TransportError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(TransportError::Frame(format!(
                    "undefined escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut StompCodec, bytes: &[u8]) -> Vec<StompItem> {
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Some(item) = codec.decode(&mut buf).unwrap() {
            out.push(item);
        }
        assert!(buf.is_empty(), "leftover bytes: {buf:?}");
        out
    }

    fn frame(item: &StompItem) -> &StompFrame {
        match item {
            StompItem::Frame(f) => f,
            StompItem::Heartbeat => panic!("expected frame"),
        }
    }

    #[test]
    fn test_heartbeats_between_frames() {
        let mut codec = StompCodec::default();
        let items = decode_all(&mut codec, b"\n\r\nMESSAGE\nid:1\n\nhi\0\n");
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], StompItem::Heartbeat);
        assert_eq!(items[1], StompItem::Heartbeat);
        assert_eq!(frame(&items[2]).body, Bytes::from_static(b"hi"));
        assert_eq!(items[3], StompItem::Heartbeat);
    }

    #[test]
    fn test_content_length_allows_nul_in_body() {
        let mut codec = StompCodec::default();
        let items = decode_all(&mut codec, b"MESSAGE\ncontent-length:3\n\na\0b\0");
        assert_eq!(frame(&items[0]).body, Bytes::from_static(b"a\0b"));
    }

    #[test]
    fn test_first_header_occurrence_wins() {
        let mut codec = StompCodec::default();
        let items = decode_all(&mut codec, b"MESSAGE\nfoo:first\nfoo:second\n\n\0");
        let f = frame(&items[0]);
        assert_eq!(f.header("foo"), Some("first"));
        assert_eq!(f.headers.len(), 2);
    }

    #[test]
    fn test_reassembles_split_input() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"MESSAGE\nsubscr"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"iption:0\r\n\r\nbo");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"dy\0");
        let item = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame(&item).header("subscription"), Some("0"));
        assert_eq!(frame(&item).body, Bytes::from_static(b"body"));
    }

    #[test]
    fn test_header_escaping_except_connected() {
        let mut codec = StompCodec::default();
        let items = decode_all(&mut codec, b"MESSAGE\nk\\cx:a\\nb\\\\\n\n\0CONNECTED\nweird:a\\cb\n\n\0");
        assert_eq!(frame(&items[0]).header("k:x"), Some("a\nb\\"));
        assert_eq!(frame(&items[1]).header("weird"), Some("a\\cb"));

        let mut out = BytesMut::new();
        let send = StompFrame::new("SEND").with_header("dest", "a:b");
        codec.encode(send.clone(), &mut out).unwrap();
        assert_eq!(&out[..], b"SEND\ndest:a\\cb\n\n\0");
        let back = codec.decode(&mut out).unwrap().unwrap();
        assert_eq!(frame(&back), &send);
    }

    #[test]
    fn test_undefined_escape_is_rejected() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"MESSAGE\nk:\\t\n\n\0"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = StompCodec::new(32);
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:100\n\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(TransportError::FrameTooLarge { limit: 32 })
        ));

        let mut buf = BytesMut::from(&[b'x'; 40][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_encoder_adds_content_length() {
        let mut codec = StompCodec::default();
        let mut out = BytesMut::new();
        codec
            .encode(StompFrame::new("SEND").with_body("{}"), &mut out)
            .unwrap();
        assert_eq!(&out[..], b"SEND\ncontent-length:2\n\n{}\0");
    }

    #[test]
    fn test_heartbeat_negotiation() {
        let hb = Heartbeat::negotiate((10_000, 10_000), Some("5000,20000")).unwrap();
        assert_eq!(hb.send, Some(Duration::from_millis(20_000)));
        assert_eq!(hb.receive, Some(Duration::from_millis(10_000)));

        let off = Heartbeat::negotiate((10_000, 0), Some("0,0")).unwrap();
        assert_eq!(off, Heartbeat::default());
        assert!(Heartbeat::negotiate((1, 1), Some("nope")).is_err());
    }
}
