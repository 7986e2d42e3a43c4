//! Groups lines from a [`LineReader`] into whole AMI messages (spec.md §4.3).

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncRead;

use crate::error::AmiError;
use crate::line_reader::LineReader;
use crate::message::Message;

/// Consumes lines from an underlying [`LineReader`] and yields whole
/// [`Message`]s, each terminated by a blank line (CRLF alone).
pub struct FrameAssembler<T> {
    lines: LineReader<T>,
    payload: BytesMut,
}

impl<T: AsyncRead + Unpin> FrameAssembler<T> {
    pub fn new(reader: T) -> Self {
        Self {
            lines: LineReader::new(reader),
            payload: BytesMut::new(),
        }
    }

    /// Reads and validates the single banner line (`Asterisk Call
    /// Manager/<version>\r\n`) that precedes all frames. This line is
    /// consumed here and never enters the frame payload.
    pub async fn read_banner(&mut self) -> Result<String, AmiError> {
        match self.lines.next_line().await.map_err(AmiError::io)? {
            None => Err(AmiError::Handshake("connection closed before banner".to_string())),
            Some(line) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end_matches(['\r', '\n']).to_string();
                if text.to_ascii_lowercase().starts_with("asterisk call manager") {
                    Ok(text)
                } else {
                    Err(AmiError::Handshake(format!("unexpected banner line: {text:?}")))
                }
            },
        }
    }

    /// Reads the next full message. Returns `Ok(None)` on a clean EOF between
    /// frames (no bytes of a new frame pending): this is the voluntary-
    /// completion case (spec.md §9, "open question: EOF disposition"). An EOF
    /// that lands mid-frame is a fatal `Malformed("unexpected EOF")`.
    ///
    /// Alongside the parsed [`Message`], returns the exact bytes read off the
    /// wire for this frame (including the terminating blank line), so a
    /// caller observing raw traffic sees what was actually sent rather than a
    /// re-serialization of the parsed fields.
    pub async fn next_message(&mut self) -> Result<Option<(Message, Bytes)>, AmiError> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    let is_blank = line.as_ref() == b"\r\n";
                    self.payload.extend_from_slice(&line);
                    if is_blank {
                        let payload = self.payload.split().freeze();
                        let msg = Message::from_bytes(&payload)?;
                        return Ok(Some((msg, payload)));
                    }
                },
                Ok(None) => {
                    return if self.payload.is_empty() {
                        Ok(None)
                    } else {
                        Err(AmiError::Malformed("unexpected EOF".to_string()))
                    };
                },
                Err(e) => return Err(AmiError::io(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{self, AsyncWriteExt};

    #[tokio::test]
    async fn rejects_bad_banner() {
        let (mut client, server) = io::duplex(1024);
        client.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();

        let mut fa = FrameAssembler::new(server);
        let err = fa.read_banner().await.unwrap_err();
        assert!(matches!(err, AmiError::Handshake(_)));
    }

    #[tokio::test]
    async fn accepts_banner_case_insensitively() {
        let (mut client, server) = io::duplex(1024);
        client
            .write_all(b"asterisk call manager/9.0.0\r\n")
            .await
            .unwrap();

        let mut fa = FrameAssembler::new(server);
        assert!(fa.read_banner().await.is_ok());
    }

    #[tokio::test]
    async fn assembles_one_frame_per_blank_line() {
        let (mut client, server) = io::duplex(4096);
        client
            .write_all(b"Response: Success\r\nActionID: X\r\n\r\n")
            .await
            .unwrap();

        let mut fa = FrameAssembler::new(server);
        let (msg, raw) = fa.next_message().await.unwrap().unwrap();
        assert_eq!(msg.get("Response"), Some("Success"));
        assert_eq!(msg.action_id(), Some("X"));
        assert_eq!(&raw[..], b"Response: Success\r\nActionID: X\r\n\r\n");
    }

    #[tokio::test]
    async fn clean_eof_between_frames_is_none() {
        let (client, server) = io::duplex(16);
        drop(client);

        let mut fa = FrameAssembler::new(server);
        assert!(fa.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_malformed() {
        let (mut client, server) = io::duplex(1024);
        client.write_all(b"Response: Success\r\n").await.unwrap();
        drop(client);

        let mut fa = FrameAssembler::new(server);
        let err = fa.next_message().await.unwrap_err();
        assert!(matches!(err, AmiError::Malformed(m) if m == "unexpected EOF"));
    }
}
