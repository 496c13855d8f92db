//! Frame codecs for line-delimited and length-prefixed streams.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec, LinesCodec, LinesCodecError};

use super::config::Framing;

/// Errors produced while framing a stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame exceeded the configured maximum length.
    #[error("frame exceeds {max} bytes")]
    TooLong {
        /// Configured maximum.
        max: usize,
    },

    /// Frame was not valid for the framing (for example non-UTF-8 text).
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
enum Inner {
    Line(LinesCodec),
    LengthPrefixed(LengthDelimitedCodec),
}

/// Codec yielding one [`Bytes`] payload per frame.
#[derive(Debug)]
pub struct FrameCodec {
    inner: Inner,
    max_frame_length: usize,
}

impl FrameCodec {
    /// Create a codec for `framing` rejecting frames over `max_frame_length`.
    #[must_use]
    pub fn new(framing: Framing, max_frame_length: usize) -> Self {
        let inner = match framing {
            Framing::Line => Inner::Line(LinesCodec::new_with_max_length(max_frame_length)),
            Framing::LengthPrefixed => Inner::LengthPrefixed(
                LengthDelimitedCodec::builder()
                    .length_field_length(4)
                    .big_endian()
                    .max_frame_length(max_frame_length)
                    .new_codec(),
            ),
        };
        Self {
            inner,
            max_frame_length,
        }
    }

    fn map_lines_error(&self, err: LinesCodecError) -> FrameError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => FrameError::TooLong {
                max: self.max_frame_length,
            },
            LinesCodecError::Io(e) => self.map_io_error(e),
        }
    }

    fn map_io_error(&self, err: std::io::Error) -> FrameError {
        if err.kind() != std::io::ErrorKind::InvalidData {
            return FrameError::Io(err);
        }
        if matches!(self.inner, Inner::LengthPrefixed(_)) {
            // The length-delimited codec reports oversized frames as
            // InvalidData.
            return FrameError::TooLong {
                max: self.max_frame_length,
            };
        }
        FrameError::Malformed(err.to_string())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        match &mut self.inner {
            Inner::Line(codec) => match codec.decode(src) {
                Ok(line) => Ok(line.map(Bytes::from)),
                Err(e) => Err(self.map_lines_error(e)),
            },
            Inner::LengthPrefixed(codec) => match codec.decode(src) {
                Ok(frame) => Ok(frame.map(BytesMut::freeze)),
                Err(e) => Err(self.map_io_error(e)),
            },
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        match &mut self.inner {
            Inner::Line(codec) => match codec.decode_eof(src) {
                Ok(line) => Ok(line.map(Bytes::from)),
                Err(e) => Err(self.map_lines_error(e)),
            },
            Inner::LengthPrefixed(codec) => match codec.decode_eof(src) {
                Ok(frame) => Ok(frame.map(BytesMut::freeze)),
                Err(e) => Err(self.map_io_error(e)),
            },
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        match &mut self.inner {
            Inner::Line(_) => {
                dst.reserve(item.len() + 1);
                dst.put(item);
                dst.put_u8(b'\n');
                Ok(())
            }
            Inner::LengthPrefixed(codec) => codec.encode(item, dst).map_err(FrameError::Io),
        }
    }
}
