use bytes::{Buf, BytesMut};
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::error::Error;

/// The longest line we are willing to buffer while waiting for a delimiter.
pub const DEFAULT_MAX_LENGTH: usize = 1024;

/// What the [`LinesCodec`] yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete line, without its delimiter (and without a trailing `\r`).
    Text(String),

    /// Bytes which could not be turned into a line and were thrown away.
    /// The whole buffer is cleared when this happens.
    Discarded {
        /// How many bytes were dropped.
        bytes: usize,
    },
}

/// This codec splits incoming bytes on a delimiter,
/// keeping any trailing partial line buffered until the rest arrives.
///
/// It also remembers when it last saw new bytes, which lets a reader
/// notice a device that went quiet without disconnecting.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a delimiter into the buffer.
    cursor: usize,

    /// How large the buffer was when we last returned.
    seen: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    delimiter: u8,

    /// A buffer growing beyond this without a delimiter is discarded.
    max_length: usize,

    last_activity: Instant,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(delimiter: u8, max_length: usize) -> Self {
        Self {
            cursor: 0,
            seen: 0,
            delimiter,
            max_length,
            last_activity: Instant::now(),
        }
    }

    /// When new bytes were last handed to the codec.
    /// Creating the codec counts as activity.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn discard(&mut self, src: &mut BytesMut, dropped: usize) -> Line {
        src.clear();
        self.cursor = 0;
        self.seen = 0;

        Line::Discarded { bytes: dropped }
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n', DEFAULT_MAX_LENGTH)
    }
}

impl Decoder for LinesCodec {
    type Item = Line;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() > self.seen {
            self.last_activity = Instant::now();
        }

        let read_to = src.len();
        let look_at = &src[self.cursor..read_to];

        let frame = if let Some(position) = look_at.iter().position(|&byte| byte == self.delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;
            self.cursor = 0;

            let line = src.split_to(actual_position);

            // Skip the delimiter itself.
            src.advance(1);

            let mut line = line.to_vec();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            match String::from_utf8(line) {
                Ok(text) => Some(Line::Text(text)),
                Err(e) => {
                    let dropped = e.as_bytes().len() + src.len();
                    warn!(error = %Error::from(e), dropped, "Clearing the line buffer");
                    Some(self.discard(src, dropped))
                }
            }
        } else if read_to > self.max_length {
            warn!(
                read_to,
                max_length = self.max_length,
                "No delimiter in sight, clearing the line buffer"
            );
            Some(self.discard(src, read_to))
        } else {
            // Next time we are called the same buffer will be provided, possibly with more data.
            // No need to look at these bytes again.
            self.cursor = read_to;
            None
        };

        self.seen = src.len();

        Ok(frame)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    debug!(bytes = src.len(), "Dropping partial line at end of stream");
                    src.clear();
                    self.cursor = 0;
                    self.seen = 0;
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn text(s: &str) -> Option<Line> {
        Some(Line::Text(s.into()))
    }

    #[test]
    fn splits_complete_lines() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from("one\ntwo\n");

        assert_eq!(codec.decode(&mut buf).unwrap(), text("one"));
        assert_eq!(codec.decode(&mut buf).unwrap(), text("two"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn keeps_partial_line_until_rest_arrives() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from("pH:6.2,te");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"pH:6.2,te");

        buf.extend_from_slice(b"mp:23.2\npH:");
        assert_eq!(codec.decode(&mut buf).unwrap(), text("pH:6.2,temp:23.2"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"pH:");
    }

    #[test]
    fn strips_carriage_return() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from("tds:10\r\n");

        assert_eq!(codec.decode(&mut buf).unwrap(), text("tds:10"));
    }

    #[test]
    fn bad_utf8_clears_buffer() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\xff\xfe\n");
        buf.extend_from_slice(b"partial");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Line::Discarded { bytes: 9 })
        );
        assert!(buf.is_empty());

        // Decoding carries on as normal afterwards.
        buf.extend_from_slice(b"fine\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), text("fine"));
    }

    #[test]
    fn overlong_line_is_discarded() {
        let mut codec = LinesCodec::new(b'\n', 8);
        let mut buf = BytesMut::from("0123456789");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Line::Discarded { bytes: 10 })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_line_dropped_at_eof() {
        let mut codec = LinesCodec::default();
        let mut buf = BytesMut::from("last\nhalf");

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), text("last"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn new_bytes_count_as_activity() {
        let mut codec = LinesCodec::default();
        let created = codec.last_activity();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let mut buf = BytesMut::from("no newline yet");
        codec.decode(&mut buf).unwrap();
        let after_bytes = codec.last_activity();
        assert!(after_bytes > created);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // Same buffer, nothing new.
        codec.decode(&mut buf).unwrap();
        assert_eq!(codec.last_activity(), after_bytes);
    }
}
