//! Framed codec for envelope streams.
//!
//! Uses LengthDelimitedCodec for framing + the Avro envelope codec for bodies.
//! Works over any AsyncRead/AsyncWrite (sockets, pipes, in-memory duplex).
//!
//! A frame whose body fails to decode is yielded as `Ok(Err(DecodeError))`
//! rather than an I/O error: `FramedRead` ends the stream after the first
//! decoder error, and one bad result must not cut off the rest.

use std::io;
use std::marker::PhantomData;

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::{DecodeError, Envelope, decode, encode};

/// Upper bound on a single frame. Results carry script output, not datasets.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Codec that frames envelopes with a 4-byte big-endian length prefix.
pub struct EnvelopeCodec<E> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<fn() -> E>,
}

impl<E> Default for EnvelopeCodec<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EnvelopeCodec<E> {
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<E: Envelope> Decoder for EnvelopeCodec<E> {
    type Item = Result<E, DecodeError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(frame) => {
                let item = decode::<E>(&frame);
                if let Err(ref e) = item {
                    tracing::debug!(frame_len = frame.len(), error = %e, "Undecodable envelope frame");
                }
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl<E: Envelope> Encoder<E> for EnvelopeCodec<E> {
    type Error = io::Error;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = encode(&item);
        tracing::trace!(frame_len = body.len(), "Encoding envelope frame");
        self.inner.encode(body, dst)
    }
}
