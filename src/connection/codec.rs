// src/connection/codec.rs

//! Splits the inbound byte stream of a device into text lines.

use crate::core::GatewayError;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio_util::codec::Decoder;

/// How inbound bytes are grouped into messages.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// One message per `\n`-terminated line. A trailing `\r` is dropped.
    #[default]
    Lines,
    /// One message per socket read, with every CR/LF removed. Matches devices
    /// that never terminate their reports.
    Chunks,
}

/// A `Decoder` yielding newline-stripped lines.
#[derive(Debug, Clone)]
pub struct LineCodec {
    framing: Framing,
    max_length: usize,
}

impl LineCodec {
    pub fn new(framing: Framing, max_length: usize) -> Self {
        Self {
            framing,
            max_length,
        }
    }

    fn take_line(&self, src: &mut BytesMut) -> Result<Option<String>, GatewayError> {
        match src.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                // The limit applies to the content, not the CRLF terminator.
                let len = if pos > 0 && src[pos - 1] == b'\r' {
                    pos - 1
                } else {
                    pos
                };
                if len > self.max_length {
                    return Err(GatewayError::LineTooLong(self.max_length));
                }
                let line = src.split_to(pos + 1);
                let text = String::from_utf8_lossy(&line);
                Ok(Some(text.trim_end_matches(['\r', '\n']).to_string()))
            }
            None => {
                let limit = if src.last() == Some(&b'\r') {
                    self.max_length + 1
                } else {
                    self.max_length
                };
                if src.len() > limit {
                    Err(GatewayError::LineTooLong(self.max_length))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn take_chunk(&self, src: &mut BytesMut) -> Option<String> {
        if src.is_empty() {
            return None;
        }
        let chunk = src.split();
        let text = String::from_utf8_lossy(&chunk);
        Some(text.replace(['\r', '\n'], ""))
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::Lines => self.take_line(src),
            Framing::Chunks => Ok(self.take_chunk(src)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // An unterminated tail is still a line once the peer stops sending.
        Ok(self.take_chunk(src))
    }
}
