// CRLF line framing over TCP.
//
// The chat network speaks line-oriented text: each frame is a UTF-8 line
// terminated by `\r\n`, at most 512 bytes including the terminator. This
// module provides both directions:
//
// - `write_line` appends the terminator and refuses anything that would not
//   fit in one frame, or that contains an embedded CR/LF (which would let a
//   relayed chat message smuggle in a second command).
// - `LineReader` accumulates bytes across reads and hands out one complete
//   line per call. It is meant to sit on a socket with a short read timeout:
//   a timeout simply means "no complete line yet" (`Ok(None)`), so the caller
//   can go do other work (sending, nick retries) and poll again next tick.
//
// Inbound lines are decoded lossily. Servers are not supposed to exceed the
// 512-byte limit, but some send longer lines when message tags are in use, so
// the reader tolerates up to `MAX_INBOUND_LINE` bytes before giving up on the
// connection.

use std::io::{self, Read, Write};

/// Maximum frame size in bytes, including the trailing CR-LF.
pub const MAX_LINE_LENGTH: usize = 512;

/// Maximum frame content in bytes, excluding the trailing CR-LF.
pub const MAX_LINE_CONTENT: usize = MAX_LINE_LENGTH - 2;

/// Longest inbound line accepted before the stream is considered corrupt.
/// 8191 bytes of tags plus a regular 512-byte frame.
pub const MAX_INBOUND_LINE: usize = 8191 + MAX_LINE_LENGTH + 1;

/// Write a single line followed by CR-LF and flush.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    if line.len() > MAX_LINE_CONTENT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "line too long: {} bytes (max {MAX_LINE_CONTENT})",
                line.len()
            ),
        ));
    }
    if line.contains(['\r', '\n']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "line contains an embedded line break",
        ));
    }
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\r\n")?;
    writer.flush()
}

/// Incremental line reader. Keeps partial input between calls so that a read
/// timeout in the middle of a line never loses data.
pub struct LineReader<R> {
    inner: R,
    pending: Vec<u8>,
    chunk: Box<[u8]>,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            chunk: vec![0u8; 2048].into_boxed_slice(),
        }
    }

    /// Return the next complete line, without its terminator.
    ///
    /// - `Ok(Some(line))` — a full line was available.
    /// - `Ok(None)` — the underlying read timed out (or would block) before a
    ///   full line arrived. Any partial data is kept for the next call.
    /// - `Err(UnexpectedEof)` — the peer closed the connection.
    /// - `Err(InvalidData)` — the peer sent an absurdly long line.
    pub fn poll_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(Some(line));
            }
            if self.pending.len() > MAX_INBOUND_LINE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "inbound line exceeds {MAX_INBOUND_LINE} bytes without a terminator"
                    ),
                ));
            }
            match self.inner.read(&mut self.chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    ));
                }
                Ok(n) => self.pending.extend_from_slice(&self.chunk[..n]),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let newline = self.pending.iter().position(|&b| b == b'\n')?;
        let mut raw: Vec<u8> = self.pending.drain(..=newline).collect();
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Some(String::from_utf8_lossy(&raw).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that yields scripted chunks, then reports a timeout for each
    /// `None` entry, then EOF.
    struct Scripted {
        steps: Vec<Option<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.steps.is_empty() {
                return Ok(0);
            }
            match self.steps.remove(0) {
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                None => Err(io::Error::new(io::ErrorKind::WouldBlock, "no data")),
            }
        }
    }

    #[test]
    fn write_appends_crlf() {
        let mut buf = Vec::new();
        write_line(&mut buf, "PING :abc").unwrap();
        assert_eq!(buf, b"PING :abc\r\n");
    }

    #[test]
    fn write_rejects_oversized_line() {
        let long = "x".repeat(MAX_LINE_CONTENT + 1);
        let mut buf = Vec::new();
        let err = write_line(&mut buf, &long).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[test]
    fn write_accepts_exact_limit() {
        let exact = "x".repeat(MAX_LINE_CONTENT);
        let mut buf = Vec::new();
        write_line(&mut buf, &exact).unwrap();
        assert_eq!(buf.len(), MAX_LINE_LENGTH);
    }

    #[test]
    fn write_rejects_embedded_newline() {
        let mut buf = Vec::new();
        let err = write_line(&mut buf, "PRIVMSG #a :hi\r\nQUIT").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn reads_multiple_lines_then_eof() {
        let mut reader = LineReader::new(Cursor::new(b"one\r\ntwo\nthree\r\n".to_vec()));
        assert_eq!(reader.poll_line().unwrap().as_deref(), Some("one"));
        assert_eq!(reader.poll_line().unwrap().as_deref(), Some("two"));
        assert_eq!(reader.poll_line().unwrap().as_deref(), Some("three"));
        let err = reader.poll_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn partial_line_survives_timeout() {
        let mut reader = LineReader::new(Scripted {
            steps: vec![Some(b"PRIVMSG #c :hel".to_vec()), None, Some(b"lo\r\n".to_vec())],
        });
        assert_eq!(reader.poll_line().unwrap(), None);
        assert_eq!(
            reader.poll_line().unwrap().as_deref(),
            Some("PRIVMSG #c :hello")
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut reader = LineReader::new(Cursor::new(b"a\xffb\r\n".to_vec()));
        assert_eq!(reader.poll_line().unwrap().as_deref(), Some("a\u{fffd}b"));
    }

    #[test]
    fn runaway_line_is_rejected() {
        let flood = vec![b'x'; MAX_INBOUND_LINE + 4096];
        let mut reader = LineReader::new(Cursor::new(flood));
        let err = reader.poll_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
