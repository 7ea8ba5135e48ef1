//! Line/record reader for a child process's stderr or progress channel.
//!
//! The child's progress channel rewrites lines with `\r` the way ffmpeg's
//! terminal progress does; stderr is ordinary `\n`-delimited debug output.
//! Both are read through the same delimiter-tolerant reader, with a
//! fixed-size scratch buffer and a max-line safeguard.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

const MAX_LINE_BYTES: usize = 4096;
const TRUNCATED_SUFFIX: &str = "(truncated)";

/// Reads an async byte stream and yields text records delimited by `\n` or
/// `\r`, bounding memory with a max-line safeguard.
pub struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    /// Returns the next record, or `None` on clean EOF.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(idx) = find_delimiter(&self.pending) {
                return Ok(Some(self.take_record(idx)));
            }

            if self.pending.len() > MAX_LINE_BYTES {
                return Ok(Some(self.take_record(MAX_LINE_BYTES)));
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let record = drain_to_string(&mut self.pending);
                return Ok(if record.is_empty() { None } else { Some(record) });
            }
            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }

    fn take_record(&mut self, idx: usize) -> String {
        let truncated = idx >= MAX_LINE_BYTES && find_delimiter(&self.pending[..idx]).is_none();
        let record_bytes: Vec<u8> = self.pending.drain(..idx).collect();
        consume_delimiters(&mut self.pending);

        let mut record = String::from_utf8_lossy(&record_bytes).trim().to_string();
        if truncated {
            record.push(' ');
            record.push_str(TRUNCATED_SUFFIX);
        }
        record
    }
}

fn drain_to_string(buf: &mut Vec<u8>) -> String {
    let s = String::from_utf8_lossy(buf).trim().to_string();
    buf.clear();
    s
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| matches!(b, b'\n' | b'\r'))
}

fn consume_delimiters(buf: &mut Vec<u8>) {
    let n = buf.iter().take_while(|&&b| matches!(b, b'\n' | b'\r')).count();
    if n > 0 {
        buf.drain(..n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn splits_on_cr_and_lf() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let _ = tx.write_all(b"one\rtwo\nthree\r\nfour").await;
        });

        let mut reader = LineReader::new(rx);
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two", "three", "four"]);
    }

    #[tokio::test]
    async fn truncates_overlong_lines() {
        let (mut tx, rx) = tokio::io::duplex(8192);
        let long = "a".repeat(5000);
        tokio::spawn({
            let long = long.clone();
            async move {
                let _ = tx.write_all(long.as_bytes()).await;
                let _ = tx.write_all(b"\n").await;
            }
        });

        let mut reader = LineReader::new(rx);
        let line = reader.next_line().await.unwrap().unwrap();
        assert!(line.ends_with(TRUNCATED_SUFFIX));
        assert!(line.len() < long.len());
    }
}
