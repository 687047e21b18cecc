//! Per-field delta encoding over LZ4.
//!
//! Each field (0 and 1) keeps its own previous-frame reference; an
//! interlaced stream never crosses references between fields. A frame is
//! either sent whole (keyframe — the decoder replaces its reference) or
//! as the byte-wise wrapping difference against the previous frame of
//! the same field. The FPGA reconstructs with wrapping addition:
//! `new = delta + prev`.

use crate::lz4;

/// Number of independent field references.
const FIELDS: usize = 2;

// ── DeltaEncoder ─────────────────────────────────────────────────

/// Stateful per-field delta encoder wrapping the LZ4 block codec.
///
/// Buffers are sized once at construction; `encode` performs no
/// allocation while a frame's length stays within `max_frame_size`.
pub struct DeltaEncoder {
    prev: [Vec<u8>; FIELDS],
    has_prev: [bool; FIELDS],
    frame_count: [u32; FIELDS],
    /// Frames between forced keyframes per field; 0 disables the cadence.
    keyframe_interval: u32,
    scratch: Vec<u8>,
}

impl DeltaEncoder {
    /// Create an encoder able to handle frames up to `max_frame_size`.
    pub fn new(max_frame_size: usize, keyframe_interval: u32) -> Self {
        Self {
            prev: [
                Vec::with_capacity(max_frame_size),
                Vec::with_capacity(max_frame_size),
            ],
            has_prev: [false; FIELDS],
            frame_count: [0; FIELDS],
            keyframe_interval,
            scratch: vec![0u8; max_frame_size],
        }
    }

    /// Drop both references, forcing the next frame of each field to be
    /// a keyframe. Called on every resolution switch.
    pub fn reset(&mut self) {
        self.has_prev = [false; FIELDS];
        self.frame_count = [0; FIELDS];
    }

    /// Encode `src` for `field`, writing LZ4 output into `dst`.
    ///
    /// Returns `(compressed_len, is_delta)`, or `None` when LZ4 cannot
    /// fit its output into `dst`.
    pub fn encode(&mut self, src: &[u8], field: u8, dst: &mut [u8]) -> Option<(usize, bool)> {
        let f = usize::from(field & 1);

        // First frame of a field, or a length change after switch_res,
        // always re-seeds the reference.
        if !self.has_prev[f] || self.prev[f].len() != src.len() {
            return self.emit_keyframe(src, f, dst);
        }

        self.frame_count[f] += 1;
        if self.keyframe_interval > 0 && self.frame_count[f] >= self.keyframe_interval {
            return self.emit_keyframe(src, f, dst);
        }

        // Wrapping 8-bit subtraction against the reference, then replace it.
        let delta = &mut self.scratch[..src.len()];
        for ((d, &cur), &prev) in delta.iter_mut().zip(src).zip(self.prev[f].iter()) {
            *d = cur.wrapping_sub(prev);
        }
        self.prev[f].clear();
        self.prev[f].extend_from_slice(src);

        let n = lz4::compress(&self.scratch[..src.len()], dst)?;
        Some((n, true))
    }

    fn emit_keyframe(&mut self, src: &[u8], f: usize, dst: &mut [u8]) -> Option<(usize, bool)> {
        self.prev[f].clear();
        self.prev[f].extend_from_slice(src);
        self.has_prev[f] = true;
        self.frame_count[f] = 0;
        let n = lz4::compress(src, dst)?;
        Some((n, false))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// FPGA-side reconstruction: keyframes replace the reference, deltas
    /// are added back with wrapping arithmetic.
    struct Decoder {
        prev: [Vec<u8>; 2],
    }

    impl Decoder {
        fn new() -> Self {
            Self {
                prev: [Vec::new(), Vec::new()],
            }
        }

        fn apply(&mut self, payload: &[u8], raw_len: usize, field: u8, is_delta: bool) -> Vec<u8> {
            let decoded = lz4_flex::block::decompress(payload, raw_len).unwrap();
            let f = usize::from(field & 1);
            let frame = if is_delta {
                decoded
                    .iter()
                    .zip(self.prev[f].iter())
                    .map(|(&d, &p)| d.wrapping_add(p))
                    .collect()
            } else {
                decoded
            };
            self.prev[f] = frame.clone();
            frame
        }
    }

    fn frame(fill: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| fill.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn first_frame_is_keyframe() {
        let mut enc = DeltaEncoder::new(1024, 0);
        let mut dst = vec![0u8; lz4::compress_bound(1024)];
        let (_, is_delta) = enc.encode(&frame(0x10, 256), 0, &mut dst).unwrap();
        assert!(!is_delta);
    }

    #[test]
    fn second_frame_is_delta() {
        let mut enc = DeltaEncoder::new(1024, 0);
        let mut dst = vec![0u8; lz4::compress_bound(1024)];
        enc.encode(&frame(0x10, 256), 0, &mut dst).unwrap();
        let (_, is_delta) = enc.encode(&frame(0x20, 256), 0, &mut dst).unwrap();
        assert!(is_delta);
    }

    #[test]
    fn keyframe_interval_round_trip() {
        // Frames 0x10…, 0x20…, …, 0x50… with interval 3: the fourth
        // frame (count reaches 3) must come out as a keyframe, and the
        // decoder must reproduce every source frame exactly.
        let mut enc = DeltaEncoder::new(1024, 3);
        let mut dec = Decoder::new();
        let mut dst = vec![0u8; lz4::compress_bound(1024)];
        let mut kinds = Vec::new();

        for fill in [0x10u8, 0x20, 0x30, 0x40, 0x50] {
            let src = frame(fill, 512);
            let (n, is_delta) = enc.encode(&src, 0, &mut dst).unwrap();
            kinds.push(is_delta);
            let rebuilt = dec.apply(&dst[..n], src.len(), 0, is_delta);
            assert_eq!(rebuilt, src, "frame 0x{fill:02X} did not survive");
        }

        assert_eq!(kinds, [false, true, true, false, true]);
    }

    #[test]
    fn fields_keep_independent_references() {
        let mut enc = DeltaEncoder::new(1024, 0);
        let mut dec = Decoder::new();
        let mut dst = vec![0u8; lz4::compress_bound(1024)];

        // Interleave the two fields with unrelated content.
        for (fill, field) in [(0x11u8, 0u8), (0xA0, 1), (0x22, 0), (0xB0, 1), (0x33, 0)] {
            let src = frame(fill, 300);
            let (n, is_delta) = enc.encode(&src, field, &mut dst).unwrap();
            let rebuilt = dec.apply(&dst[..n], src.len(), field, is_delta);
            assert_eq!(rebuilt, src, "field {field} fill 0x{fill:02X}");
        }
    }

    #[test]
    fn reset_forces_keyframe() {
        let mut enc = DeltaEncoder::new(1024, 0);
        let mut dst = vec![0u8; lz4::compress_bound(1024)];
        enc.encode(&frame(1, 128), 0, &mut dst).unwrap();
        enc.reset();
        let (_, is_delta) = enc.encode(&frame(2, 128), 0, &mut dst).unwrap();
        assert!(!is_delta);
    }

    #[test]
    fn length_change_reseeds_reference() {
        let mut enc = DeltaEncoder::new(1024, 0);
        let mut dst = vec![0u8; lz4::compress_bound(1024)];
        enc.encode(&frame(1, 128), 0, &mut dst).unwrap();
        let (_, is_delta) = enc.encode(&frame(2, 256), 0, &mut dst).unwrap();
        assert!(!is_delta);
    }

    #[test]
    fn wrapping_subtraction_survives_overflow() {
        let mut enc = DeltaEncoder::new(16, 0);
        let mut dec = Decoder::new();
        let mut dst = vec![0u8; lz4::compress_bound(16)];

        let a = vec![0xFFu8; 16];
        let b = vec![0x01u8; 16]; // delta wraps: 0x01 - 0xFF = 0x02
        let (n, _) = enc.encode(&a, 0, &mut dst).unwrap();
        dec.apply(&dst[..n], a.len(), 0, false);
        let (n, is_delta) = enc.encode(&b, 0, &mut dst).unwrap();
        assert!(is_delta);
        assert_eq!(dec.apply(&dst[..n], b.len(), 0, true), b);
    }
}
