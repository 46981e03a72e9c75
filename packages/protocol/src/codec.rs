use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

use crate::{ProtocolError, QueryResult};

/// ASCII group separator. As the first byte of a line it is a batch-sync
/// command; as a whole payload it is the sync response.
pub const SYNC_MARKER: u8 = 0x1D;

const LENGTH_PREFIX_LEN: usize = 4;

/// Something the server writes to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `00 00 00 01 1D`
    Sync,
    /// Length-prefixed `QueryResult`.
    Result(QueryResult),
    /// A `QueryResult` followed by a newline with no length prefix. Only
    /// written when bootstrap fails, before the framed protocol starts.
    BootstrapError(QueryResult),
}

/// Longest statement line the server accepts, newline excluded.
pub const MAX_LINE_LEN: usize = 16 * 1024 * 1024;

/// Server side codec: decodes `\n` terminated lines and encodes [`Frame`]s.
#[derive(Debug)]
pub struct ReplCodec {
    lines: AnyDelimiterCodec,
    max_line_len: usize,
}

impl ReplCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_len(MAX_LINE_LEN)
    }

    #[must_use]
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            lines: line_codec(max_line_len),
            max_line_len,
        }
    }

    fn line_error(&self, error: AnyDelimiterCodecError) -> ProtocolError {
        match error {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => {
                ProtocolError::LineTooLong(self.max_line_len)
            }
            AnyDelimiterCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

fn line_codec(max_line_len: usize) -> AnyDelimiterCodec {
    AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), vec![], max_line_len)
}

impl Default for ReplCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ReplCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.lines.decode(buf).map_err(|e| self.line_error(e))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        if !buf.is_empty() {
            log::debug!(
                "Discarding {} bytes of unterminated input at end of stream",
                buf.len()
            );
            buf.clear();
            self.lines = line_codec(self.max_line_len);
        }

        Ok(None)
    }
}

impl Encoder<Frame> for ReplCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            Frame::Sync => {
                dst.reserve(LENGTH_PREFIX_LEN + 1);
                dst.put_u32(1);
                dst.put_u8(SYNC_MARKER);
            }
            Frame::Result(result) => {
                let payload = result.to_bytes();
                let len = u32::try_from(payload.len())
                    .map_err(|_| ProtocolError::FrameTooLarge(payload.len()))?;
                log::trace!("Encoding result frame of {len} bytes");
                dst.reserve(LENGTH_PREFIX_LEN + payload.len());
                dst.put_u32(len);
                dst.put_slice(&payload);
            }
            Frame::BootstrapError(result) => {
                let payload = result.to_bytes();
                dst.reserve(payload.len() + 1);
                dst.put_slice(&payload);
                dst.put_u8(b'\n');
            }
        }

        Ok(())
    }
}

/// What a client reads back for each line it sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Sync,
    Result(QueryResult),
}

/// Client side codec for the length-prefixed responses. Lines are sent as
/// raw bytes so only the decoder half is needed.
#[derive(Debug, Default)]
pub struct ResponseCodec;

impl Decoder for ResponseCodec {
    type Item = Response;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&buf[..LENGTH_PREFIX_LEN]);
        let len = u32::from_be_bytes(prefix) as usize;

        if buf.len() < LENGTH_PREFIX_LEN + len {
            buf.reserve(LENGTH_PREFIX_LEN + len - buf.len());
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_LEN);
        let payload = buf.split_to(len);

        if payload[..] == [SYNC_MARKER] {
            return Ok(Some(Response::Sync));
        }

        Ok(Some(Response::Result(QueryResult::from_bytes(&payload)?)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(response) => Ok(Some(response)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::UnexpectedEof),
        }
    }
}
