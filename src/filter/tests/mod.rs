use crate::filter::CuckooFilter;

#[test]
fn insert_then_lookup_returns_recorded_chunk_index() {
    let mut filter = CuckooFilter::new();
    filter.insert(42, b"key-one");
    filter.insert(99, b"key-two");

    assert_eq!(filter.lookup(b"key-one"), (42, true));
    assert_eq!(filter.lookup(b"key-two"), (99, true));
}

#[test]
fn lookup_of_absent_key_is_usually_a_miss() {
    let mut filter = CuckooFilter::new();
    for i in 0..50u64 {
        filter.insert(i, format!("present-{i}").as_bytes());
    }
    let (_, found) = filter.lookup(b"definitely-not-present-xyz");
    assert!(!found);
}

#[test]
fn serialize_deserialize_round_trip_preserves_lookups() {
    let mut filter = CuckooFilter::new();
    let mut keys = Vec::new();
    for i in 0..500u64 {
        let key = format!("k{i:05}").into_bytes();
        filter.insert(i, &key);
        keys.push((key, i));
    }

    let bytes = filter.serialize().expect("serialize");
    let restored = CuckooFilter::deserialize(&bytes).expect("deserialize");

    for (key, chunk_index) in keys {
        assert_eq!(restored.lookup(&key), (chunk_index, true));
    }
}

#[test]
fn growth_past_initial_capacity_preserves_all_entries() {
    let mut filter = CuckooFilter::new();
    let count = 12_000u64;
    for i in 0..count {
        let key = format!("grow-key-{i}").into_bytes();
        filter.insert(i, &key);
    }
    assert_eq!(filter.len() as u64, count);
    for i in 0..count {
        let key = format!("grow-key-{i}").into_bytes();
        assert_eq!(filter.lookup(&key), (i, true));
    }
}

#[test]
fn empty_filter_reports_no_entries() {
    let filter = CuckooFilter::new();
    assert!(filter.is_empty());
    assert_eq!(filter.lookup(b"anything"), (0, false));
}
