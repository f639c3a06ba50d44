use bytes::{Buf, BytesMut};
use std::env;
use std::io::Cursor;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::frame::{self, Frame};
use crate::parser::{DecodeEngine, ReaderOptions};
use crate::Error;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Decodes one reply at a time.
///
/// Completeness is tracked across calls: the scan resumes where the previous call stopped, with
/// the elements still missing at every open array level, so a reply that arrives line by line is
/// scanned once and only parsed when all of it is buffered. The buffer must only be appended to
/// between calls.
pub struct FrameCodec {
    max_frame_size: usize,
    scanned: usize,
    pending: Vec<usize>,
}

impl FrameCodec {
    pub fn new() -> FrameCodec {
        FrameCodec {
            max_frame_size: FrameCodec::max_frame_size(),
            scanned: 0,
            pending: Vec::new(),
        }
    }

    fn max_frame_size() -> usize {
        env::var("MAX_FRAME_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    fn reset(&mut self) {
        self.scanned = 0;
        self.pending.clear();
    }

    /// Returns the length of the first reply in `src` once all of it has been received.
    fn scan(&mut self, src: &[u8]) -> Result<Option<usize>, frame::Error> {
        loop {
            let mut cursor = Cursor::new(src);
            cursor.set_position(self.scanned as u64);

            let elements = match Frame::check(&mut cursor) {
                Ok(elements) => elements,
                Err(frame::Error::Incomplete) => return Ok(None),
                Err(err) => return Err(err),
            };
            self.scanned = cursor.position() as usize;

            if let Some(elements) = elements {
                if self.pending.len() >= frame::MAX_DEPTH {
                    return Err(frame::depth_exceeded());
                }
                self.pending.push(elements);
                continue;
            }

            // A value is complete, and so is every array it was the last element of.
            loop {
                match self.pending.last_mut() {
                    None => {
                        let end = self.scanned;
                        self.scanned = 0;
                        return Ok(Some(end));
                    }
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.pending.pop();
                    }
                }
            }
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Check if the frame size exceeds a certain limit to prevent DoS attacks
        if src.len() > self.max_frame_size {
            self.reset();
            return Err(Error::InvalidResponse(format!(
                "frame size exceeds limit of {} bytes",
                self.max_frame_size
            )));
        }

        let end = match self.scan(&src[..]) {
            Ok(Some(end)) => end,
            Ok(None) => return Ok(None), // Not enough data to parse a frame.
            Err(err) => {
                self.reset();
                return Err(err.into());
            }
        };

        let mut cursor = Cursor::new(&src[..end]);
        let frame = Frame::parse(&mut cursor)?;

        // Remove the parsed frame from the buffer.
        src.advance(end);

        Ok(Some(frame))
    }
}

/// The default decode engine: buffers whatever it is fed and hands out one reply at a time once
/// it has been fully received.
pub struct Reader {
    codec: FrameCodec,
    buffer: BytesMut,
    options: ReaderOptions,
}

impl Reader {
    pub fn new(options: ReaderOptions) -> Reader {
        Reader {
            codec: FrameCodec::new(),
            // Allocate the buffer with 4kb of capacity.
            buffer: BytesMut::with_capacity(4096),
            options,
        }
    }

    /// Number of fed bytes not yet consumed by a reply.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn decode_text(&self, frame: Frame) -> Result<Frame, Error> {
        match frame {
            Frame::Bulk(bytes) => {
                let text = self
                    .options
                    .encoding
                    .decode(&bytes, self.options.encoding_errors)?;
                Ok(Frame::Text(text))
            }
            Frame::Array(frames) => frames
                .into_iter()
                .map(|frame| self.decode_text(frame))
                .collect::<Result<Vec<_>, _>>()
                .map(Frame::Array),
            frame => Ok(frame),
        }
    }
}

impl DecodeEngine for Reader {
    fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn try_get_reply(&mut self) -> Result<Option<Frame>, Error> {
        let frame = match self.codec.decode(&mut self.buffer)? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        trace!(remaining = self.buffer.len(), "decoded reply");

        if self.options.decode_responses {
            return self.decode_text(frame).map(Some);
        }
        Ok(Some(frame))
    }
}
