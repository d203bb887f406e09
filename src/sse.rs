//! Chunk decoding and event parsing for streamed chat responses.
//!
//! The chat backend answers with a plain-text body made of `data: <payload>` lines.  Transport
//! chunks carry no alignment to those lines, so decoding happens in two stages: [`frames`] turns
//! the byte stream into complete newline-delimited frames, and [`parse_frame`] classifies each
//! frame as a content fragment, the terminal marker, or an ignorable line.  [`process_sse`]
//! composes the two into the stream the reconciler consumes.

use std::borrow::Cow;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use tokio_util::codec::Decoder;

use crate::observability::{
    STREAM_BYTES, STREAM_DISCARDED_TAILS, STREAM_FRAGMENTS, STREAM_FRAMES, STREAM_IGNORED_FRAMES,
    STREAM_MALFORMED_FRAMES,
};
use crate::{Error, Result};

/// Prefix of every frame that carries a payload.
pub const DATA_PREFIX: &str = "data: ";

/// Payload that ends a response.
pub const DONE_SENTINEL: &str = "[DONE]";

///////////////////////////////////////// FrameDecoder ////////////////////////////////////////

/// Splits a byte buffer into newline-terminated frames.
///
/// Bytes are buffered rather than text so that a multi-byte character split across two chunks
/// is reassembled before it is decoded.  Invalid sequences in a complete frame become U+FFFD and
/// the rest of the frame is kept.  The newline is not part of the frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    // Bytes before this index are known not to contain a newline.
    next_index: usize,
}

impl FrameDecoder {
    /// Create a decoder with an empty carry-over position.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameDecoder {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
            self.next_index = src.len();
            return Ok(None);
        };
        let newline = self.next_index + offset;
        self.next_index = 0;
        let line = src.split_to(newline + 1);
        let frame = match String::from_utf8_lossy(&line[..newline]) {
            Cow::Borrowed(frame) => frame.to_string(),
            Cow::Owned(frame) => {
                STREAM_MALFORMED_FRAMES.click();
                tracing::debug!(frame = %frame, "replaced invalid UTF-8 in frame");
                frame
            }
        };
        Ok(Some(frame))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            STREAM_DISCARDED_TAILS.click();
            tracing::debug!(
                bytes = src.len(),
                "discarding unterminated frame at end of stream"
            );
            src.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

/// Turn a stream of byte chunks into a lazy stream of complete frames.
///
/// Every frame held in the buffer is yielded before the next chunk is read, so frames come out
/// in arrival order no matter how the transport fragments them.  Content left in the buffer
/// when the byte stream ends is discarded.  A frame that is not valid UTF-8 is yielded as a
/// [`Error::MalformedFrame`]; transport errors are passed through unchanged.
pub fn frames<S>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = (byte_stream, BytesMut::new(), FrameDecoder::new(), false);
    stream::unfold(
        state,
        |(mut stream, mut buffer, mut decoder, mut exhausted)| async move {
            loop {
                match decoder.decode(&mut buffer) {
                    Ok(Some(frame)) => {
                        return Some((Ok(frame), (stream, buffer, decoder, exhausted)));
                    }
                    Err(err) => return Some((Err(err), (stream, buffer, decoder, exhausted))),
                    Ok(None) => {}
                }
                if exhausted {
                    return None;
                }
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend_from_slice(&bytes);
                    }
                    Some(Err(err)) => {
                        return Some((Err(err), (stream, buffer, decoder, exhausted)));
                    }
                    None => {
                        exhausted = true;
                        match decoder.decode_eof(&mut buffer) {
                            Ok(Some(frame)) => {
                                return Some((Ok(frame), (stream, buffer, decoder, exhausted)));
                            }
                            Ok(None) => return None,
                            Err(err) => {
                                return Some((Err(err), (stream, buffer, decoder, exhausted)));
                            }
                        }
                    }
                }
            }
        },
    )
}

////////////////////////////////////////// StreamEvent ////////////////////////////////////////

/// A classified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A piece of assistant text.
    Fragment(String),

    /// The terminal marker.  Nothing follows it.
    Done,
}

/// Classify a single frame.
///
/// Returns `None` for frames the grammar treats as ignorable: lines without the `data: ` prefix
/// (keep-alives, comments, blank lines) and data lines whose trimmed payload is empty.
pub fn parse_frame(frame: &str) -> Option<StreamEvent> {
    let payload = frame.strip_prefix(DATA_PREFIX)?.trim();
    if payload == DONE_SENTINEL {
        Some(StreamEvent::Done)
    } else if payload.is_empty() {
        None
    } else {
        Some(StreamEvent::Fragment(payload.to_string()))
    }
}

/// Process a stream of bytes into a stream of fragments ending with [`StreamEvent::Done`].
///
/// The returned stream stops after the terminal marker without reading further.  If the byte
/// stream closes first, the returned stream simply ends; the caller decides what a missing
/// marker means.  Malformed and ignorable frames are dropped here and never reach the caller.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let frames = Box::pin(frames(byte_stream));
    stream::unfold((frames, false), |(mut frames, finished)| async move {
        if finished {
            return None;
        }
        loop {
            match frames.next().await? {
                Ok(frame) => {
                    STREAM_FRAMES.click();
                    match parse_frame(&frame) {
                        Some(StreamEvent::Done) => {
                            return Some((Ok(StreamEvent::Done), (frames, true)));
                        }
                        Some(event) => {
                            STREAM_FRAGMENTS.click();
                            return Some((Ok(event), (frames, false)));
                        }
                        None => {
                            STREAM_IGNORED_FRAMES.click();
                            tracing::trace!(frame = %frame, "ignoring non-data frame");
                        }
                    }
                }
                Err(err) if err.is_malformed_frame() => {
                    STREAM_MALFORMED_FRAMES.click();
                    tracing::debug!(error = %err, "dropping malformed frame");
                }
                Err(err) => return Some((Err(err), (frames, false))),
            }
        }
    })
}
