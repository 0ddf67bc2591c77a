//! Length-prefix framing
//!
//! Wire format, repeated:
//! `[i32 little-endian length N][N bytes payload]`

use tracing::trace;

use super::Protocol;
use crate::config::{EngineConfig, LENGTH_HEADER_SIZE};
use crate::core::{ByteRing, WorkItem};
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Stage {
    #[default]
    Length,
    Body,
}

/// Per-connection Tcp0 state: which stage and how many bytes it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tcp0Cursor {
    stage: Stage,
    required: usize,
}

impl Default for Tcp0Cursor {
    fn default() -> Self {
        Self {
            stage: Stage::Length,
            required: LENGTH_HEADER_SIZE,
        }
    }
}

impl Tcp0Cursor {
    /// Bytes the current stage still waits for.
    pub fn required(&self) -> usize {
        self.required
    }

    pub fn awaiting_body(&self) -> bool {
        self.stage == Stage::Body
    }
}

/// Length-prefix codec.
#[derive(Debug, Clone, Copy)]
pub struct Tcp0 {
    max_frame_length: usize,
}

impl Tcp0 {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.frame_limit())
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Writes one framed payload into a plain buffer.
    pub fn frame_into(payload: &[u8], dst: &mut Vec<u8>) -> Result<()> {
        let prefix = length_prefix(payload.len())?;
        dst.reserve(LENGTH_HEADER_SIZE + payload.len());
        dst.extend_from_slice(&prefix);
        dst.extend_from_slice(payload);
        Ok(())
    }
}

/// Little-endian `i32` prefix for `len`, rejecting lengths an `i32` cannot hold.
pub(crate) fn length_prefix(len: usize) -> Result<[u8; LENGTH_HEADER_SIZE]> {
    i32::try_from(len)
        .map(i32::to_le_bytes)
        .map_err(|_| Error::framing(format!("payload of {} bytes does not fit an i32 prefix", len)))
}

impl Protocol for Tcp0 {
    type Cursor = Tcp0Cursor;
    type Message = ();

    fn decode(
        &self,
        cursor: &mut Tcp0Cursor,
        inbound: &mut ByteRing,
        item: &mut WorkItem<()>,
    ) -> Result<bool> {
        if cursor.stage == Stage::Length {
            if !inbound.peek_ready(|view| view.len() >= LENGTH_HEADER_SIZE) {
                return Ok(false);
            }

            let mut header = [0u8; LENGTH_HEADER_SIZE];
            inbound.read(&mut header)?;
            let length = i32::from_le_bytes(header);

            if length < 0 || length as usize > self.max_frame_length {
                return Err(Error::framing(format!(
                    "length prefix {} outside 0..={}",
                    length, self.max_frame_length
                )));
            }

            cursor.stage = Stage::Body;
            cursor.required = length as usize;
            trace!(length, "tcp0 header");
        }

        let required = cursor.required;
        if !inbound.peek_ready(|view| view.len() >= required) {
            return Ok(false);
        }

        inbound.read_into(required, item.payload_mut())?;
        *cursor = Tcp0Cursor::default();
        Ok(true)
    }

    fn encode(&self, _cursor: &mut Tcp0Cursor, payload: &[u8], outbound: &mut ByteRing) -> Result<()> {
        let prefix = length_prefix(payload.len())?;

        let needed = LENGTH_HEADER_SIZE + payload.len();
        if needed > outbound.remaining() {
            return Err(Error::CapacityExceeded {
                needed,
                available: outbound.remaining(),
            });
        }

        outbound.write(&prefix)?;
        outbound.write(payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{WorkPool, WorkTarget};

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        Tcp0::frame_into(payload, &mut out).unwrap();
        out
    }

    /// Feeds `wire` in `chunk`-sized pieces and collects every decoded payload.
    fn decode_chunked(codec: &Tcp0, ring_size: usize, wire: &[u8], chunk: usize) -> Vec<Vec<u8>> {
        let mut ring = ByteRing::with_capacity(ring_size);
        let mut cursor = Tcp0Cursor::default();
        let mut pool: WorkPool<()> = WorkPool::new(4);
        let mut out = Vec::new();

        for piece in wire.chunks(chunk.max(1)) {
            ring.write(piece).unwrap();
            loop {
                let item = pool.next_free().unwrap();
                if !codec.decode(&mut cursor, &mut ring, item).unwrap() {
                    break;
                }
                out.push(item.payload().to_vec());
                let id = pool.claim_next(WorkTarget::Connection(0)).unwrap();
                let mut done = |w: &mut WorkItem<()>| w.finish();
                pool.dispatch(&mut done, |_| unreachable!());
                assert!(pool.get(id).unwrap().payload().is_empty());
            }
        }
        out
    }

    #[test]
    fn test_le_prefix() {
        let wire = framed(b"hello");
        assert_eq!(&wire[..4], &[5, 0, 0, 0]);
        assert_eq!(&wire[4..], b"hello");
    }

    #[test]
    fn test_chunking_does_not_change_result() {
        let codec = Tcp0::new(1 << 20);
        for n in [0usize, 1, 4096, 65536] {
            let payload: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
            let wire = framed(&payload);

            let whole = decode_chunked(&codec, 70_000, &wire, wire.len());
            let bytewise = decode_chunked(&codec, 70_000, &wire, 1);

            assert_eq!(whole, vec![payload.clone()], "n = {}", n);
            assert_eq!(bytewise, whole, "n = {}", n);
        }
    }

    #[test]
    fn test_frames_across_ring_wrap() {
        let codec = Tcp0::new(64);
        let mut wire = Vec::new();
        for i in 0..40u8 {
            Tcp0::frame_into(&[i; 7], &mut wire).unwrap();
        }
        // 16 byte ring forces every other frame to straddle the wrap point
        let frames = decode_chunked(&codec, 16, &wire, 5);
        assert_eq!(frames.len(), 40);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame, &vec![i as u8; 7]);
        }
    }

    #[test]
    fn test_header_waits_for_four_bytes() {
        let codec = Tcp0::new(64);
        let mut ring = ByteRing::with_capacity(16);
        let mut cursor = Tcp0Cursor::default();
        let mut pool: WorkPool<()> = WorkPool::new(1);

        ring.write(&[3, 0, 0]).unwrap();
        assert!(!codec.decode(&mut cursor, &mut ring, pool.next_free().unwrap()).unwrap());
        assert_eq!(ring.len(), 3);
        assert!(!cursor.awaiting_body());

        ring.write(&[0, b'a']).unwrap();
        assert!(!codec.decode(&mut cursor, &mut ring, pool.next_free().unwrap()).unwrap());
        assert!(cursor.awaiting_body());
        assert_eq!(cursor.required(), 3);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_negative_and_oversized_prefix_rejected() {
        let codec = Tcp0::new(8);
        let mut pool: WorkPool<()> = WorkPool::new(1);

        for bad in [-1i32, 9] {
            let mut ring = ByteRing::with_capacity(16);
            let mut cursor = Tcp0Cursor::default();
            ring.write(&bad.to_le_bytes()).unwrap();
            let result = codec.decode(&mut cursor, &mut ring, pool.next_free().unwrap());
            assert!(matches!(result, Err(Error::Framing(_))));
        }
    }

    #[test]
    fn test_prefix_rejects_lengths_past_i32() {
        assert_eq!(length_prefix(5).unwrap(), [5, 0, 0, 0]);
        assert_eq!(length_prefix(i32::MAX as usize).unwrap(), i32::MAX.to_le_bytes());
        assert!(matches!(
            length_prefix(i32::MAX as usize + 1),
            Err(Error::Framing(_))
        ));
    }

    #[test]
    fn test_encode_is_all_or_nothing() {
        let codec = Tcp0::new(64);
        let mut cursor = Tcp0Cursor::default();
        let mut ring = ByteRing::with_capacity(8);

        codec.encode(&mut cursor, b"ab", &mut ring).unwrap();
        assert_eq!(ring.len(), 6);
        assert!(matches!(
            codec.encode(&mut cursor, b"c", &mut ring),
            Err(Error::CapacityExceeded { needed: 5, available: 2 })
        ));
        assert_eq!(ring.len(), 6);
    }
}
