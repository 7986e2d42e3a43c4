//! Incrementally parses an inbound byte stream into CRLF-terminated lines
//! (spec.md §4.2).

use std::io;

use bytes::{Bytes, BytesMut};
use itertools::Itertools;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the chunks `LineReader` reads from its underlying stream when no
/// complete line is buffered yet.
const READ_CHUNK: usize = 4096;

/// Provides a facility to read CRLF-terminated lines from a stream.
///
/// Unlike a line reader that strips the terminator, `LineReader` returns the
/// CRLF *included* in the line it yields, so that a blank line (CRLF alone)
/// can be recognised downstream without re-adding the terminator.
pub struct LineReader<T> {
    /// Stores data that's been read in but lacks a CRLF.
    buf: BytesMut,
    /// Index in `buf` from which a valid CRLF pair may appear (and before
    /// which a CRLF sequence hasn't been seen).
    maybe_crlf_from: usize,
    /// Data source.
    reader: T,
    /// On a reading error, this field is set and its value returned once the
    /// buffer is drained of pending lines.
    pending_error: Option<io::Error>,
}

impl<T: AsyncRead + Unpin> LineReader<T> {
    pub fn new(reader: T) -> Self {
        Self {
            buf: BytesMut::new(),
            maybe_crlf_from: 0,
            reader,
            pending_error: None,
        }
    }

    /// Reads a line (CRLF included) from the internal buffer and/or reader.
    /// Returns `Ok(None)` on a clean end-of-stream with no partial line
    /// pending. A partially-read line left over at EOF is discarded; callers
    /// that care whether EOF landed mid-frame detect that themselves (see
    /// `crate::frame::FrameAssembler`), since a bare `LineReader` has no
    /// notion of "mid-frame".
    ///
    /// Transient errors equivalent to `EINTR` or a read timeout are retried
    /// without surfacing. Any other error is returned once the buffer is
    /// drained of lines already read.
    pub async fn next_line(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            // Scan from one position earlier than the start of the newest
            // bytes, in case a previous read ended between '\r' and '\n'.
            if let Some(eoc) = self
                .buf
                .iter()
                .skip(self.maybe_crlf_from)
                .tuple_windows::<(_, _)>()
                .position(|x| x == (&b'\r', &b'\n'))
            {
                let end = self.maybe_crlf_from + eoc + 2;
                let line = self.buf.split_to(end).freeze();
                self.maybe_crlf_from = 0;
                return Ok(Some(line));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = match self.reader.read(&mut chunk).await {
                Ok(n) => n,
                Err(e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                },
                Err(e) => {
                    self.pending_error = Some(e);
                    0
                },
            };

            if n == 0 {
                return match self.pending_error.take() {
                    Some(e) => Err(e),
                    None => Ok(None),
                };
            }

            self.maybe_crlf_from = self.buf.len().saturating_sub(1);
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{self, AsyncWriteExt};
    use tokio::task::yield_now;

    #[tokio::test]
    async fn reassembles_split_and_pipelined_lines() {
        let tests: &[&[u8]] = &[
            b"test:",
            b"1\r\n",
            b"test:",
            b"2\r",
            b"\n",
            b"test:",
            b"3",
            b"\r",
            b"\n",
            b"test:4\r\ntest:5\r\n",
            b"test:6\r",
            b"\ntest:7\r\n",
            b"test:8",
            b"\r\ntest:9\r\n",
        ];

        let (mut client, server) = io::duplex(4096);

        tokio::spawn(async move {
            for buf in tests {
                client.write_all(buf).await.unwrap();
                yield_now().await;
            }
        });

        let mut lr = LineReader::new(server);

        for n in 1..=9 {
            let line = lr.next_line().await.unwrap().unwrap();
            assert_eq!(line, Bytes::from(format!("test:{n}\r\n")));
        }

        assert!(lr.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reports_io_error_after_draining_buffered_lines() {
        struct FlakyReader {
            data: &'static [u8],
            sent: bool,
        }

        impl AsyncRead for FlakyReader {
            fn poll_read(
                mut self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                if !self.sent {
                    self.sent = true;
                    buf.put_slice(self.data);
                    std::task::Poll::Ready(Ok(()))
                } else {
                    std::task::Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "boom",
                    )))
                }
            }
        }

        let mut lr = LineReader::new(FlakyReader {
            data: b"first\r\n",
            sent: false,
        });

        assert_eq!(lr.next_line().await.unwrap().unwrap(), Bytes::from("first\r\n"));
        let err = lr.next_line().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
