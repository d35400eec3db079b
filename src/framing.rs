//! Newline-delimited framing
//!
//! One JSON document per line. Partial lines are buffered until the newline
//! arrives; there is no length limit beyond available memory.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Reads newline-terminated frames from a buffered byte stream
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next complete frame without its line terminator.
    ///
    /// Blank lines are skipped. Returns `Ok(None)` at end of stream; bytes
    /// left unterminated at that point are discarded.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            self.buf.clear();
            let read = self.reader.read_until(b'\n', &mut self.buf).await?;
            if read == 0 {
                return Ok(None);
            }

            if self.buf.last() != Some(&b'\n') {
                tracing::debug!(
                    "Discarding {} unterminated bytes at end of stream",
                    self.buf.len()
                );
                return Ok(None);
            }

            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }

            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(std::mem::take(&mut self.buf)));
        }
    }
}

/// Serialize a value as a single newline-terminated frame
pub fn encode_frame<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(value)?;
    frame.push(b'\n');
    Ok(frame)
}
