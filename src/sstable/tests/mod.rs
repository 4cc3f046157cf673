use super::*;
use tempfile::tempdir;

#[test]
fn build_then_get_roundtrips_live_records() {
    let dir = tempdir().unwrap();
    let records = vec![
        (b"a".to_vec(), b"1".to_vec(), None),
        (b"b".to_vec(), b"2".to_vec(), None),
        (b"c".to_vec(), b"3".to_vec(), None),
    ];
    let table = Sstable::build(&dir.path().join("t.sst"), false, records).unwrap();

    let (value, ttl) = table.get(b"b").unwrap().unwrap();
    assert_eq!(value, b"2");
    assert_eq!(ttl, None);
}

#[test]
fn get_of_absent_key_is_none() {
    let dir = tempdir().unwrap();
    let records = vec![(b"a".to_vec(), b"1".to_vec(), None)];
    let table = Sstable::build(&dir.path().join("t.sst"), false, records).unwrap();
    assert!(table.get(b"zzz").unwrap().is_none());
}

#[test]
fn compressed_table_roundtrips_key_and_value() {
    let dir = tempdir().unwrap();
    let value = b"a value repeated repeated repeated repeated".to_vec();
    let records = vec![(b"key-one".to_vec(), value.clone(), None)];
    let table = Sstable::build(&dir.path().join("t.sst"), true, records).unwrap();
    let (got, _) = table.get(b"key-one").unwrap().unwrap();
    assert_eq!(got, value);
}

#[test]
fn iter_records_visits_every_record_in_order() {
    let dir = tempdir().unwrap();
    let records: Vec<_> =
        (0..40u32).map(|i| (i.to_be_bytes().to_vec(), vec![i as u8; 5], None)).collect();
    let table = Sstable::build(&dir.path().join("t.sst"), false, records.clone()).unwrap();

    let decoded: Vec<Vec<u8>> = table.iter_records().map(|r| r.unwrap().key).collect();
    let expected: Vec<Vec<u8>> = records.into_iter().map(|(k, _, _)| k).collect();
    assert_eq!(decoded, expected);
}

#[test]
fn reopened_table_preserves_filter_and_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.sst");
    {
        let records = vec![(b"k".to_vec(), b"v".to_vec(), Some(12345))];
        let table = Sstable::build(&path, false, records).unwrap();
        table.close().unwrap();
    }
    let table = Sstable::open(&path).unwrap();
    let (value, ttl) = table.get(b"k").unwrap().unwrap();
    assert_eq!(value, b"v");
    assert_eq!(ttl, Some(12345));
    assert_eq!(table.record_count(), 1);
}

#[test]
fn tombstone_value_roundtrips_as_ordinary_bytes() {
    let dir = tempdir().unwrap();
    let records = vec![(b"k".to_vec(), crate::engine::TOMBSTONE.to_vec(), None)];
    let table = Sstable::build(&dir.path().join("t.sst"), false, records).unwrap();
    let (value, _) = table.get(b"k").unwrap().unwrap();
    assert_eq!(value, crate::engine::TOMBSTONE);
}
