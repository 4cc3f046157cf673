use super::*;

fn mt() -> Memtable {
    Memtable::new(DEFAULT_MAX_LEVEL, DEFAULT_PROBABILITY)
}

#[test]
fn insert_then_search_roundtrips() {
    let mut m = mt();
    m.insert(b"key1".to_vec(), b"value1".to_vec(), None).unwrap();
    let (value, found) = m.search(b"key1", 0);
    assert!(found);
    assert_eq!(value, b"value1");
}

#[test]
fn search_missing_key_is_not_found() {
    let m = mt();
    let (_, found) = m.search(b"nope", 0);
    assert!(!found);
}

#[test]
fn overwrite_updates_value_without_double_counting_size() {
    let mut m = mt();
    m.insert(b"k".to_vec(), b"short".to_vec(), None).unwrap();
    let after_first = m.size();
    m.insert(b"k".to_vec(), b"a-much-longer-value".to_vec(), None)
        .unwrap();
    assert_eq!(m.len(), 1);
    assert_eq!(m.size(), 1 + "a-much-longer-value".len());
    assert!(m.size() > after_first);
}

#[test]
fn empty_key_is_rejected() {
    let mut m = mt();
    assert!(matches!(
        m.insert(Vec::new(), b"v".to_vec(), None),
        Err(MemtableError::EmptyKeyOrValue)
    ));
}

#[test]
fn expired_entry_reads_as_not_found() {
    let mut m = mt();
    m.insert(b"k".to_vec(), b"v".to_vec(), Some(100)).unwrap();
    let (_, found_before) = m.search(b"k", 50);
    assert!(found_before);
    let (_, found_after) = m.search(b"k", 100);
    assert!(!found_after);
}

#[test]
fn forward_iteration_is_key_ascending() {
    let mut m = mt();
    for k in [b"c".to_vec(), b"a".to_vec(), b"b".to_vec()] {
        m.insert(k.clone(), k, None).unwrap();
    }
    let keys: Vec<Vec<u8>> = m.iter_forward().map(|(k, _, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn backward_iteration_is_key_descending() {
    let mut m = mt();
    for k in [b"c".to_vec(), b"a".to_vec(), b"b".to_vec()] {
        m.insert(k.clone(), k, None).unwrap();
    }
    let keys: Vec<Vec<u8>> = m.iter_backward().map(|(k, _, _)| k).collect();
    assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn copy_is_an_independent_snapshot() {
    let mut m = mt();
    m.insert(b"k".to_vec(), b"v".to_vec(), None).unwrap();
    let snapshot = m.copy();
    m.insert(b"k2".to_vec(), b"v2".to_vec(), None).unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(m.len(), 2);
}

#[test]
fn many_keys_maintain_sorted_order_under_random_levels() {
    let mut m = Memtable::new(4, 0.5);
    let mut keys: Vec<Vec<u8>> = (0..200).map(|i: u32| i.to_be_bytes().to_vec()).collect();
    // Insert out of order to exercise the skip-list search path.
    let mut shuffled = keys.clone();
    shuffled.reverse();
    for (i, k) in shuffled.iter().enumerate() {
        m.insert(k.clone(), i.to_string().into_bytes(), None).unwrap();
    }
    keys.sort();
    let observed: Vec<Vec<u8>> = m.iter_forward().map(|(k, _, _)| k).collect();
    assert_eq!(observed, keys);
}
