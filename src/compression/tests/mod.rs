use crate::compression::{compress, decompress, CompressionError};

#[test]
fn round_trips_empty_input() {
    let compressed = compress(b"");
    assert_eq!(decompress(&compressed).expect("decompress"), b"");
}

#[test]
fn round_trips_incompressible_data() {
    let data = b"xyzzy1239847!@#$";
    let compressed = compress(data);
    assert_eq!(decompress(&compressed).expect("decompress"), data);
}

#[test]
fn round_trips_highly_repetitive_data() {
    let data = vec![b'a'; 10_000];
    let compressed = compress(&data);
    assert!(compressed.len() < data.len());
    assert_eq!(decompress(&compressed).expect("decompress"), data);
}

#[test]
fn handles_overlapping_back_references() {
    // "abab" followed by enough repetitions to force a match whose length
    // exceeds its distance.
    let mut data = b"ab".to_vec();
    for _ in 0..20 {
        let last_two = [data[data.len() - 2], data[data.len() - 1]];
        data.extend_from_slice(&last_two);
    }
    let compressed = compress(&data);
    assert_eq!(decompress(&compressed).expect("decompress"), data);
}

#[test]
fn round_trips_realistic_mixed_text() {
    let data = b"the quick brown fox jumps over the lazy dog, the quick brown fox runs away".repeat(5);
    let compressed = compress(&data);
    assert_eq!(decompress(&compressed).expect("decompress"), data);
}

#[test]
fn decompress_rejects_truncated_stream() {
    let err = decompress(&[0, 1]).expect_err("expected truncation error");
    assert!(matches!(err, CompressionError::TruncatedInput(_)));
}

#[test]
fn decompress_rejects_out_of_range_back_reference() {
    let mut bogus = Vec::new();
    bogus.extend_from_slice(&100u16.to_be_bytes());
    bogus.push(5);
    let err = decompress(&bogus).expect_err("expected invalid back-reference");
    assert!(matches!(err, CompressionError::InvalidBackReference { .. }));
}
