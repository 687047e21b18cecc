//! LZ4 block compression into caller-provided buffers.
//!
//! The firmware decodes raw LZ4 blocks (no frame wrapper), so the host
//! side uses the matching block API. Nothing allocates on the hot path:
//! the output buffer is owned by the connection and sized once at open
//! via [`compress_bound`].

/// Worst-case compressed size for an `n`-byte input.
pub fn compress_bound(n: usize) -> usize {
    lz4_flex::block::get_maximum_output_size(n)
}

/// Block-compress `src` into `dst`.
///
/// Returns the compressed length, or `None` when `dst` is too small —
/// the caller surfaces that as a compression failure.
pub fn compress(src: &[u8], dst: &mut [u8]) -> Option<usize> {
    lz4_flex::block::compress_into(src, dst).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_block_decompress() {
        let src: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let mut dst = vec![0u8; compress_bound(src.len())];
        let n = compress(&src, &mut dst).unwrap();
        assert!(n > 0);
        let back = lz4_flex::block::decompress(&dst[..n], src.len()).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn repetitive_input_shrinks() {
        let src = vec![0xABu8; 64 * 1024];
        let mut dst = vec![0u8; compress_bound(src.len())];
        let n = compress(&src, &mut dst).unwrap();
        assert!(n < src.len() / 10);
    }

    #[test]
    fn undersized_buffer_reports_none() {
        // Incompressible input cannot fit in a 4-byte output buffer.
        let src: Vec<u8> = (0..=255u8).collect();
        let mut dst = [0u8; 4];
        assert!(compress(&src, &mut dst).is_none());
    }

    #[test]
    fn empty_input_is_valid() {
        let mut dst = vec![0u8; compress_bound(0)];
        let n = compress(&[], &mut dst).unwrap();
        let back = lz4_flex::block::decompress(&dst[..n], 0).unwrap();
        assert!(back.is_empty());
    }
}
