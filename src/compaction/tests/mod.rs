use super::*;
use crate::sstable::Sstable;
use tempfile::tempdir;

fn build(dir: &std::path::Path, name: &str, records: Vec<(Vec<u8>, Vec<u8>, Option<i64>)>) -> Sstable {
    Sstable::build(&dir.join(name), false, records).unwrap()
}

#[test]
fn fewer_than_two_tables_is_a_no_op() {
    let dir = tempdir().unwrap();
    let t = build(dir.path(), "a.sst", vec![(b"k".to_vec(), b"v".to_vec(), None)]);
    let mut ordinal = 0u64;
    let out = compact_pass(vec![t], dir.path(), false, 0, &mut ordinal).unwrap();
    assert_eq!(out.len(), 1);
}

#[test]
fn exactly_two_tables_is_skipped() {
    let dir = tempdir().unwrap();
    let a = build(dir.path(), "a.sst", vec![(b"a".to_vec(), b"1".to_vec(), None)]);
    let b = build(dir.path(), "b.sst", vec![(b"b".to_vec(), b"2".to_vec(), None)]);
    let mut ordinal = 0u64;
    let out = compact_pass(vec![a, b], dir.path(), false, 0, &mut ordinal).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(ordinal, 0);
}

#[test]
fn three_tables_merges_oldest_pair_and_keeps_newest() {
    let dir = tempdir().unwrap();
    let a = build(dir.path(), "a.sst", vec![(b"a".to_vec(), b"1".to_vec(), None)]);
    let b = build(dir.path(), "b.sst", vec![(b"b".to_vec(), b"2".to_vec(), None)]);
    let c = build(dir.path(), "c.sst", vec![(b"c".to_vec(), b"3".to_vec(), None)]);
    let mut ordinal = 100u64;
    let out = compact_pass(vec![a, b, c], dir.path(), false, 0, &mut ordinal).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(ordinal, 101);
    assert!(out[0].get(b"a").unwrap().is_some());
    assert!(out[0].get(b"b").unwrap().is_some());
    assert!(out[1].get(b"c").unwrap().is_some());
}

#[test]
fn newer_table_wins_on_duplicate_key() {
    let dir = tempdir().unwrap();
    let older = build(dir.path(), "a.sst", vec![(b"k".to_vec(), b"old".to_vec(), None)]);
    let newer = build(dir.path(), "b.sst", vec![(b"k".to_vec(), b"new".to_vec(), None)]);
    let third = build(dir.path(), "c.sst", vec![(b"z".to_vec(), b"3".to_vec(), None)]);
    let mut ordinal = 0u64;
    let out = compact_pass(vec![older, newer, third], dir.path(), false, 0, &mut ordinal).unwrap();
    let (value, _) = out[0].get(b"k").unwrap().unwrap();
    assert_eq!(value, b"new");
}

#[test]
fn tombstones_and_expired_records_are_dropped_during_merge() {
    let dir = tempdir().unwrap();
    let older = build(
        dir.path(),
        "a.sst",
        vec![
            (b"dead".to_vec(), crate::engine::TOMBSTONE.to_vec(), None),
            (b"expired".to_vec(), b"v".to_vec(), Some(10)),
            (b"alive".to_vec(), b"v".to_vec(), None),
        ],
    );
    let newer = build(dir.path(), "b.sst", vec![(b"zzz".to_vec(), b"v".to_vec(), None)]);
    let third = build(dir.path(), "c.sst", vec![(b"aaa".to_vec(), b"v".to_vec(), None)]);
    let mut ordinal = 0u64;
    let out = compact_pass(vec![older, newer, third], dir.path(), false, 20, &mut ordinal).unwrap();
    assert!(out[0].get(b"dead").unwrap().is_none());
    assert!(out[0].get(b"expired").unwrap().is_none());
    assert!(out[0].get(b"alive").unwrap().is_some());
}

#[test]
fn merged_source_files_are_removed_from_disk() {
    let dir = tempdir().unwrap();
    let a_path = dir.path().join("a.sst");
    let b_path = dir.path().join("b.sst");
    let a = Sstable::build(&a_path, false, vec![(b"a".to_vec(), b"1".to_vec(), None)]).unwrap();
    let b = Sstable::build(&b_path, false, vec![(b"b".to_vec(), b"2".to_vec(), None)]).unwrap();
    let c = build(dir.path(), "c.sst", vec![(b"c".to_vec(), b"3".to_vec(), None)]);
    let mut ordinal = 0u64;
    compact_pass(vec![a, b, c], dir.path(), false, 0, &mut ordinal).unwrap();
    assert!(!a_path.exists());
    assert!(!b_path.exists());
}
