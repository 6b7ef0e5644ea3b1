//! Reassembly of stream frames from arbitrary byte chunks.

use bytes::{Buf, BytesMut};

use crate::messages::{declared_stream_len, decode_stream_prefix, DecodeError, StreamFrame};

/// Accumulates bytes read from a stream transport and yields complete frames.
///
/// A frame with a sane length but bad content is skipped as a unit; a frame
/// whose length field itself is invalid leaves no way to find the next frame
/// boundary, so the whole buffer is dropped.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        FrameBuffer {
            buffer: BytesMut::with_capacity(crate::MAX_PAYLOAD),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Try to take the next complete frame.
    ///
    /// Returns `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<StreamFrame, DecodeError>> {
        match decode_stream_prefix(&self.buffer) {
            Ok((frame, used)) => {
                self.buffer.advance(used);
                Some(Ok(frame))
            }
            Err(DecodeError::Truncated { .. }) => None,
            Err(e @ (DecodeError::FrameLength(_) | DecodeError::Oversized(_))) => {
                self.buffer.clear();
                Some(Err(e))
            }
            Err(e) => {
                match declared_stream_len(&self.buffer) {
                    Ok(total) if total <= self.buffer.len() => self.buffer.advance(total),
                    _ => self.buffer.clear(),
                }
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::tests::message_strategy;
    use crate::{encode_stream, Message};
    use proptest::prelude::*;

    /// Drain every frame currently available.
    fn drain(buf: &mut FrameBuffer) -> Vec<Result<StreamFrame, DecodeError>> {
        let mut out = Vec::new();
        while let Some(frame) = buf.next_frame() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn test_reassembles_split_frames() {
        let a = encode_stream(&Message::CommandOn { device: 0x31 }, 1).unwrap();
        let b = encode_stream(
            &Message::DataBlock {
                sync: None,
                data: vec![0x53, 0x00, 0x00],
            },
            2,
        )
        .unwrap();
        let mut joined = a.clone();
        joined.extend_from_slice(&b);

        let mut buf = FrameBuffer::new();
        buf.push(&joined[..3]);
        assert!(buf.next_frame().is_none());
        buf.push(&joined[3..a.len() + 4]);
        let first = buf.next_frame().unwrap().unwrap();
        assert_eq!(first.message, Message::CommandOn { device: 0x31 });
        assert!(buf.next_frame().is_none());
        buf.push(&joined[a.len() + 4..]);
        let second = buf.next_frame().unwrap().unwrap();
        assert_eq!(second.timestamp, 2);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_skips_bad_frame_and_continues() {
        // well-formed length, unknown event type
        let mut data = vec![0x0A, 0, 0, 0, 0, 0, 0, 0, 0x77, 0];
        data.extend(encode_stream(&Message::PingRequest, 0).unwrap());

        let mut buf = FrameBuffer::new();
        buf.push(&data);
        assert_eq!(
            buf.next_frame().unwrap(),
            Err(DecodeError::Unsupported(0x77))
        );
        assert_eq!(buf.next_frame().unwrap().unwrap().message, Message::PingRequest);
    }

    #[test]
    fn test_invalid_length_clears_buffer() {
        let mut buf = FrameBuffer::new();
        buf.push(&[0x02, 0, 0, 0, 1, 2, 3]);
        assert_eq!(buf.next_frame().unwrap(), Err(DecodeError::FrameLength(2)));
        assert_eq!(buf.pending(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn reassembles_any_chunking(
            msgs in prop::collection::vec(message_strategy(), 1..8),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
        ) {
            let mut joined = Vec::new();
            for (i, msg) in msgs.iter().enumerate() {
                let frame = encode_stream(msg, i as u32).unwrap_or_else(|e| panic!("encode failed: {e}"));
                joined.extend_from_slice(&frame);
            }
            let mut points: Vec<usize> = cuts.iter().map(|c| c.index(joined.len())).collect();
            points.push(joined.len());
            points.sort_unstable();

            let mut buf = FrameBuffer::new();
            let mut frames = Vec::new();
            let mut start = 0;
            for end in points {
                buf.push(&joined[start..end]);
                start = end;
                for frame in drain(&mut buf) {
                    frames.push(frame.unwrap_or_else(|e| panic!("decode failed: {e}")));
                }
            }

            prop_assert_eq!(buf.pending(), 0);
            prop_assert_eq!(frames.len(), msgs.len());
            for (i, (frame, msg)) in frames.iter().zip(&msgs).enumerate() {
                prop_assert_eq!(frame.timestamp, i as u32);
                prop_assert_eq!(&frame.message, msg);
            }
        }

        #[test]
        fn arbitrary_chunks_never_panic(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..32),
        ) {
            let mut buf = FrameBuffer::new();
            for chunk in chunks {
                buf.push(&chunk);
                let before = buf.pending();
                let frames = drain(&mut buf);
                // only a buffer-clearing error can take less than a header
                prop_assert!(frames.len() <= before / crate::STREAM_HEADER_LEN + 1);
                if frames.is_empty() {
                    prop_assert_eq!(buf.pending(), before);
                }
            }
        }
    }
}
