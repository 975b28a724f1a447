//! Incremental frame decoding for byte streams.
//!
//! A TCP read can return half a frame, or three frames glued together. The
//! [`FrameDecoder`] buffers whatever arrives and hands back complete
//! messages one at a time.
//!
//! Before decoding, the codec's [`scan_frame`](Codec::scan_frame) walks
//! only the new bytes, so a large frame trickling in over many reads costs
//! time proportional to its size rather than its size squared.

use crate::{Codec, FrameScan, Message, ProtocolError};

/// Buffers stream bytes and yields complete, validated messages.
#[derive(Debug)]
pub struct FrameDecoder<C: Codec> {
    codec: C,
    buf: Vec<u8>,
    scan: FrameScan,
    max_frame_len: usize,
}

impl<C: Codec> FrameDecoder<C> {
    /// Creates a decoder that refuses to buffer more than `max_frame_len`
    /// bytes of a single unfinished frame.
    pub fn new(codec: C, max_frame_len: usize) -> Self {
        Self {
            codec,
            buf: Vec::new(),
            scan: FrameScan::default(),
            max_frame_len,
        }
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pops the next complete message, if the buffer holds one.
    ///
    /// Call in a loop after each [`extend`](Self::extend) until it returns
    /// `Ok(None)`.
    ///
    /// # Errors
    /// Any decode or validation error, or [`ProtocolError::FrameTooLarge`]
    /// when the unfinished frame outgrows the limit. The decoder is useless
    /// after an error: the stream is desynchronized.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        if !self.codec.scan_frame(&self.buf, &mut self.scan) {
            return self.incomplete();
        }
        match self.codec.decode_prefix(&self.buf)? {
            Some((value, used)) => {
                self.buf.drain(..used);
                self.scan = FrameScan::default();
                Message::from_value(value).map(Some)
            }
            None => self.incomplete(),
        }
    }

    fn incomplete(&self) -> Result<Option<Message>, ProtocolError> {
        if self.buf.len() > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len: self.buf.len(),
                max: self.max_frame_len,
            });
        }
        Ok(None)
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rmpv::Value;

    use super::*;
    use crate::MsgpackCodec;

    /// Counts full decode attempts.
    #[derive(Default)]
    struct Counting {
        decodes: AtomicUsize,
    }

    impl Codec for Counting {
        fn encode(&self, value: &Value) -> Result<Vec<u8>, ProtocolError> {
            MsgpackCodec.encode(value)
        }

        fn decode_prefix(
            &self,
            data: &[u8],
        ) -> Result<Option<(Value, usize)>, ProtocolError> {
            self.decodes.fetch_add(1, Ordering::Relaxed);
            MsgpackCodec.decode_prefix(data)
        }

        fn scan_frame(&self, data: &[u8], scan: &mut FrameScan) -> bool {
            MsgpackCodec.scan_frame(data, scan)
        }
    }

    fn frame(msg: Message) -> Vec<u8> {
        msg.encode(&MsgpackCodec).unwrap()
    }

    #[test]
    fn test_assembles_frame_split_across_reads() {
        let bytes = frame(Message::request(1, "hello", vec![]));
        let (head, tail) = bytes.split_at(bytes.len() / 2);

        let mut decoder = FrameDecoder::new(MsgpackCodec, 1024);
        decoder.extend(head);
        assert!(decoder.next_message().unwrap().is_none());
        assert_eq!(decoder.buffered(), head.len());

        decoder.extend(tail);
        let msg = decoder.next_message().unwrap().unwrap();
        assert_eq!(msg, Message::request(1, "hello", vec![]));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_emits_every_pipelined_frame() {
        let mut bytes = frame(Message::response(0, Ok(Value::from("world"))));
        bytes.extend(frame(Message::response(1, Ok(Value::from(8)))));
        bytes.extend(frame(Message::notify("tick", vec![])));

        let mut decoder = FrameDecoder::new(MsgpackCodec, 1024);
        decoder.extend(&bytes);

        let mut seen = Vec::new();
        while let Some(msg) = decoder.next_message().unwrap() {
            seen.push(msg);
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], Message::notify("tick", vec![]));
    }

    #[test]
    fn test_large_frame_in_small_reads_is_decoded_once() {
        let payload = vec![0xab; 4 * 1024 * 1024];
        let msg = Message::notify("upload", vec![Value::Binary(payload)]);
        let bytes = frame(msg.clone());

        let mut decoder = FrameDecoder::new(Counting::default(), 16 * 1024 * 1024);
        let mut seen = Vec::new();
        for chunk in bytes.chunks(8 * 1024) {
            decoder.extend(chunk);
            while let Some(next) = decoder.next_message().unwrap() {
                seen.push(next);
            }
        }

        assert_eq!(seen, vec![msg]);
        assert_eq!(decoder.codec.decodes.load(Ordering::Relaxed), 1);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_scan_restarts_for_each_pipelined_frame() {
        let first = frame(Message::notify("a", vec![Value::Binary(vec![1; 100])]));
        let second = frame(Message::request(4, "b", vec![Value::from(2)]));
        let mut bytes = first.clone();
        bytes.extend(&second);

        let mut decoder = FrameDecoder::new(Counting::default(), 1024);
        decoder.extend(&bytes[..first.len() + 3]);
        assert!(decoder.next_message().unwrap().is_some());
        assert!(decoder.next_message().unwrap().is_none());
        decoder.extend(&bytes[first.len() + 3..]);
        assert_eq!(
            decoder.next_message().unwrap(),
            Some(Message::request(4, "b", vec![Value::from(2)]))
        );
        assert_eq!(decoder.codec.decodes.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_frame_limit() {
        let bytes = frame(Message::notify("x", vec![Value::from("a".repeat(64))]));
        let mut decoder = FrameDecoder::new(MsgpackCodec, 16);
        decoder.extend(&bytes[..32]);
        let err = decoder.next_message().unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { len: 32, max: 16 }));
    }

    #[test]
    fn test_invalid_frame_is_an_error() {
        let bytes = MsgpackCodec.encode(&Value::from("not a frame")).unwrap();
        let mut decoder = FrameDecoder::new(MsgpackCodec, 1024);
        decoder.extend(&bytes);
        assert!(decoder.next_message().is_err());
    }
}
