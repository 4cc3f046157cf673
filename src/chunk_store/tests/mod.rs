use crate::chunk_store::{ChunkStore, CHUNK_PAYLOAD};
use tempfile::tempdir;

#[test]
fn write_then_read_round_trips_small_record() {
    let dir = tempdir().expect("tempdir");
    let store = ChunkStore::open(&dir.path().join("store.bin")).expect("open");
    let idx = store.write(b"hello world").expect("write");
    let got = store.read(idx).expect("read");
    assert_eq!(&got[..11], b"hello world");
}

#[test]
fn write_spans_multiple_chunks_when_longer_than_payload() {
    let dir = tempdir().expect("tempdir");
    let store = ChunkStore::open(&dir.path().join("store.bin")).expect("open");
    let payload = vec![7u8; CHUNK_PAYLOAD * 3 + 17];
    let idx = store.write(&payload).expect("write");
    let got = store.read(idx).expect("read");
    assert_eq!(&got[..payload.len()], payload.as_slice());
    assert_eq!(store.count(), 4);
}

#[test]
fn write_to_overwrites_existing_location() {
    let dir = tempdir().expect("tempdir");
    let store = ChunkStore::open(&dir.path().join("store.bin")).expect("open");
    let idx = store.write(b"first").expect("write");
    store.write_to(idx, b"second-value").expect("write_to");
    let got = store.read(idx).expect("read");
    assert_eq!(&got[..12], b"second-value");
}

#[test]
fn read_past_end_of_file_returns_eof() {
    let dir = tempdir().expect("tempdir");
    let store = ChunkStore::open(&dir.path().join("store.bin")).expect("open");
    let err = store.read(42).expect_err("expected eof");
    assert!(matches!(err, crate::chunk_store::ChunkStoreError::Eof));
}

#[test]
fn reopening_preserves_previously_written_chunks() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("store.bin");
    let idx = {
        let store = ChunkStore::open(&path).expect("open");
        let idx = store.write(b"persisted").expect("write");
        store.close().expect("close");
        idx
    };
    let store = ChunkStore::open(&path).expect("reopen");
    let got = store.read(idx).expect("read");
    assert_eq!(&got[..9], b"persisted");
}

#[test]
fn concurrent_writes_to_distinct_records_do_not_corrupt_each_other() {
    let dir = tempdir().expect("tempdir");
    let store = std::sync::Arc::new(ChunkStore::open(&dir.path().join("store.bin")).expect("open"));
    let mut handles = Vec::new();
    for i in 0..8u8 {
        let store = std::sync::Arc::clone(&store);
        handles.push(std::thread::spawn(move || {
            let payload = vec![i; 2048];
            let idx = store.write(&payload).expect("write");
            (idx, payload)
        }));
    }
    for h in handles {
        let (idx, payload) = h.join().expect("thread");
        let got = store.read(idx).expect("read");
        assert_eq!(&got[..payload.len()], payload.as_slice());
    }
}
