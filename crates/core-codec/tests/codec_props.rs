//! Property-based round-trip tests for the varint and sparse-array codec.

use core_codec::{
    CodecError, get_sparse32, get_varint64, put_sparse32, put_varint, sparse_span,
};
use proptest::collection::vec;
use proptest::prelude::*;

proptest! {
    // Every u64 survives an encode/decode round trip and consumes exactly
    // its encoded length.
    #[test]
    fn varint_round_trip(value in any::<u64>()) {
        let mut buf = Vec::new();
        put_varint(&mut buf, value);
        let (decoded, read) = get_varint64(&buf).unwrap();
        prop_assert_eq!(decoded, value);
        prop_assert_eq!(read, buf.len());
    }

    // Any strict prefix of a valid encoding is a clean failure, never a
    // misread value.
    #[test]
    fn varint_prefix_is_unexpected_eof(value in any::<u64>(), cut in 0usize..9) {
        let mut buf = Vec::new();
        put_varint(&mut buf, value);
        let cut = cut.min(buf.len().saturating_sub(1));
        prop_assert_eq!(
            get_varint64(&buf[..cut]).unwrap_err(),
            CodecError::UnexpectedEof
        );
    }

    // Sparse arrays drawn from a mostly-zero distribution round trip and
    // the segmenter-facing span agrees with the encoder.
    #[test]
    fn sparse_round_trip(
        values in vec(prop_oneof![9 => Just(0u32), 1 => 1u32..100_000], 0..256)
    ) {
        let mut buf = Vec::new();
        put_sparse32(&mut buf, &values, 0);
        let mut decoded = vec![u32::MAX; values.len()];
        let read = get_sparse32(&buf, &mut decoded).unwrap();
        prop_assert_eq!(read, buf.len());
        prop_assert_eq!(decoded, values.clone());
        prop_assert_eq!(sparse_span(&buf, values.len()).unwrap(), buf.len());
    }

    // Truncating a non-trivial sparse encoding always fails.
    #[test]
    fn sparse_prefix_fails(
        values in vec(prop_oneof![3 => Just(0u32), 1 => 1u32..1000], 1..64),
        cut in 0usize..64,
    ) {
        prop_assume!(values.iter().any(|&v| v != 0));
        let mut buf = Vec::new();
        put_sparse32(&mut buf, &values, 0);
        let cut = cut.min(buf.len() - 1);
        let mut out = vec![0u32; values.len()];
        prop_assert!(get_sparse32(&buf[..cut], &mut out).is_err());
    }
}
