use super::*;
use tempfile::tempdir;

fn wal(dir: &tempfile::TempDir) -> Wal {
    Wal::open(&dir.path().join("wal.log")).unwrap()
}

#[test]
fn append_then_replay_roundtrips() {
    let dir = tempdir().unwrap();
    let w = wal(&dir);
    w.append(&Operation::put(b"k1".to_vec(), b"v1".to_vec())).unwrap();
    w.append(&Operation::delete(b"k2".to_vec())).unwrap();

    let ops: Vec<Operation> = w.replay_iter().map(|r| r.unwrap()).collect();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].code, OpCode::Put);
    assert_eq!(ops[0].key, b"k1");
    assert_eq!(ops[0].value, b"v1");
    assert_eq!(ops[1].code, OpCode::Delete);
    assert_eq!(ops[1].key, b"k2");
}

#[test]
fn empty_log_replays_nothing() {
    let dir = tempdir().unwrap();
    let w = wal(&dir);
    assert_eq!(w.replay_iter().count(), 0);
}

#[test]
fn inverse_operation_roundtrips() {
    let dir = tempdir().unwrap();
    let w = wal(&dir);
    let op = Operation::put(b"k".to_vec(), b"new".to_vec())
        .with_inverse(Operation::put(b"k".to_vec(), b"old".to_vec()));
    w.append(&op).unwrap();

    let replayed: Vec<Operation> = w.replay_iter().map(|r| r.unwrap()).collect();
    assert_eq!(replayed.len(), 1);
    let inverse = replayed[0].inverse.as_ref().unwrap();
    assert_eq!(inverse.code, OpCode::Put);
    assert_eq!(inverse.value, b"old");
}

#[test]
fn nested_inverse_chain_roundtrips() {
    let dir = tempdir().unwrap();
    let w = wal(&dir);
    let innermost = Operation::delete(b"k".to_vec());
    let middle = Operation::put(b"k".to_vec(), b"v2".to_vec()).with_inverse(innermost);
    let outer = Operation::put(b"k".to_vec(), b"v3".to_vec()).with_inverse(middle);
    w.append(&outer).unwrap();

    let replayed: Vec<Operation> = w.replay_iter().map(|r| r.unwrap()).collect();
    let mid = replayed[0].inverse.as_ref().unwrap();
    let inner = mid.inverse.as_ref().unwrap();
    assert_eq!(inner.code, OpCode::Delete);
    assert!(inner.inverse.is_none());
}

#[test]
fn replay_preserves_append_order_across_many_records() {
    let dir = tempdir().unwrap();
    let w = wal(&dir);
    for i in 0..50u32 {
        w.append(&Operation::put(i.to_be_bytes().to_vec(), vec![i as u8; 10])).unwrap();
    }
    let keys: Vec<Vec<u8>> = w.replay_iter().map(|r| r.unwrap().key).collect();
    let expected: Vec<Vec<u8>> = (0..50u32).map(|i| i.to_be_bytes().to_vec()).collect();
    assert_eq!(keys, expected);
}

#[test]
fn reopening_an_existing_log_preserves_prior_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wal.log");
    {
        let w = Wal::open(&path).unwrap();
        w.append(&Operation::put(b"k".to_vec(), b"v".to_vec())).unwrap();
        w.close().unwrap();
    }
    let w = Wal::open(&path).unwrap();
    let ops: Vec<Operation> = w.replay_iter().map(|r| r.unwrap()).collect();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].key, b"k");
}
