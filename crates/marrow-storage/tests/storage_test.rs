//! End-to-end tests over heap files and B+tree indexes together.

use marrow_common::config::StorageConfig;
use marrow_common::schema::{Column, DataType, IndexDescriptor, TableSchema, Value};
use marrow_common::MarrowError;
use marrow_storage::{decode_tuple, encode_tuple, BTreeIndex, HeapFile, Rid};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

fn test_config(dir: &std::path::Path) -> StorageConfig {
    StorageConfig {
        data_dir: dir.to_path_buf(),
        buffer_pool_pages: 8,
        max_tuple_size: 2048,
        fsync_enabled: false,
    }
}

fn users_schema() -> TableSchema {
    TableSchema::new(
        "users",
        vec![
            Column::new("id", DataType::Int, false),
            Column::new("name", DataType::Text, false),
            Column::new("email", DataType::Text, true),
        ],
    )
}

fn user_tuple(id: i32, name: &str, email: Option<&str>) -> Vec<Option<Value>> {
    vec![
        Some(Value::Int(id)),
        Some(Value::Text(name.to_string())),
        email.map(|e| Value::Text(e.to_string())),
    ]
}

#[test]
fn heap_crud_roundtrip_through_codec() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let schema = users_schema();
    let heap = HeapFile::create(&config, "users").unwrap();

    let values = user_tuple(1, "alice", Some("alice@example.com"));
    let encoded = encode_tuple(&values, &schema, config.max_tuple_size).unwrap();
    let rid = heap.insert_tuple(&encoded).unwrap();

    let raw = heap.read_tuple(rid).unwrap();
    let decoded = decode_tuple(&raw, &schema).unwrap();
    assert_eq!(decoded, values);

    heap.delete_tuple(rid).unwrap();
    let err = heap.read_tuple(rid).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn heap_scan_skips_deleted_across_pages() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let schema = users_schema();
    let heap = HeapFile::create(&config, "users").unwrap();

    let padding = "p".repeat(200);
    let mut rids = Vec::new();
    for i in 0..200 {
        let values = user_tuple(i, &format!("user-{:04}", i), Some(&padding));
        let encoded = encode_tuple(&values, &schema, config.max_tuple_size).unwrap();
        rids.push(heap.insert_tuple(&encoded).unwrap());
    }
    assert!(heap.num_pages() > 2, "expected data to span multiple pages");

    for rid in rids.iter().take(50) {
        heap.delete_tuple(*rid).unwrap();
    }

    let mut seen = 0;
    for item in heap.scan_all() {
        let (_, bytes) = item.unwrap();
        let decoded = decode_tuple(&bytes, &schema).unwrap();
        match decoded[0].as_ref().unwrap() {
            Value::Int(id) => assert!(*id >= 50),
            other => panic!("unexpected value: {:?}", other),
        }
        seen += 1;
    }
    assert_eq!(seen, 150);
}

#[test]
fn vacuum_compacts_and_preserves_survivors() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let schema = users_schema();
    let heap = HeapFile::create(&config, "users").unwrap();

    let padding = "p".repeat(120);
    let mut rids = Vec::new();
    for i in 0..300 {
        let values = user_tuple(i, &format!("user-{:04}", i), Some(&padding));
        let encoded = encode_tuple(&values, &schema, config.max_tuple_size).unwrap();
        rids.push(heap.insert_tuple(&encoded).unwrap());
    }

    for rid in rids.iter().skip(100) {
        heap.delete_tuple(*rid).unwrap();
    }

    let pages_before = heap.num_pages();
    let stats = heap.vacuum().unwrap();
    assert_eq!(stats.pages_before, pages_before);
    assert_eq!(stats.tuples_reclaimed, 200);
    assert!(stats.pages_after < stats.pages_before);
    assert_eq!(heap.num_pages(), stats.pages_after);

    let ids: Vec<i32> = heap
        .scan_all()
        .map(|item| {
            let (_, bytes) = item.unwrap();
            match decode_tuple(&bytes, &schema).unwrap()[0] {
                Some(Value::Int(id)) => id,
                ref other => panic!("unexpected value: {:?}", other),
            }
        })
        .collect();
    assert_eq!(ids.len(), 100);
    for id in ids {
        assert!(id < 100);
    }
}

#[test]
fn index_over_heap_with_rebuild_after_vacuum() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let schema = users_schema();
    let heap = HeapFile::create(&config, "users").unwrap();
    let descriptor = IndexDescriptor::new("pkey", vec!["id".to_string()], true);
    let index = BTreeIndex::create(&config, "users", &descriptor).unwrap();

    for i in 0..100 {
        let values = user_tuple(i, &format!("user-{:04}", i), None);
        let encoded = encode_tuple(&values, &schema, config.max_tuple_size).unwrap();
        let rid = heap.insert_tuple(&encoded).unwrap();
        index.insert(index.make_key(vec![Value::Int(i)]).unwrap(), rid).unwrap();
    }

    // Point lookup through the index
    let key = index.make_key(vec![Value::Int(37)]).unwrap();
    let rid = index.search(&key).unwrap().unwrap();
    let decoded = decode_tuple(&heap.read_tuple(rid).unwrap(), &schema).unwrap();
    assert_eq!(decoded[0], Some(Value::Int(37)));

    // Delete a row from both structures
    heap.delete_tuple(rid).unwrap();
    assert!(index.delete(&key).unwrap());

    // Vacuum invalidates rids, so the index is rebuilt from a fresh scan
    heap.vacuum().unwrap();
    let index = BTreeIndex::create(&config, "users", &descriptor).unwrap();
    for item in heap.scan_all() {
        let (rid, bytes) = item.unwrap();
        let decoded = decode_tuple(&bytes, &schema).unwrap();
        let id = match decoded[0] {
            Some(Value::Int(id)) => id,
            ref other => panic!("unexpected value: {:?}", other),
        };
        index.insert(index.make_key(vec![Value::Int(id)]).unwrap(), rid).unwrap();
    }

    for i in 0..100 {
        let key = index.make_key(vec![Value::Int(i)]).unwrap();
        let found = index.search(&key).unwrap();
        if i == 37 {
            assert!(found.is_none());
        } else {
            let rid = found.unwrap();
            let decoded = decode_tuple(&heap.read_tuple(rid).unwrap(), &schema).unwrap();
            assert_eq!(decoded[0], Some(Value::Int(i)));
        }
    }
}

#[test]
fn index_random_insert_search_delete() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let descriptor = IndexDescriptor::new("pkey", vec!["id".to_string()], true);
    let index = BTreeIndex::create(&config, "nums", &descriptor).unwrap();

    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB7EE);
    let mut keys: Vec<i32> = (0..1000).collect();
    keys.shuffle(&mut rng);

    for &k in &keys {
        let rid = Rid::new(1 + (k / 100) as u32, (k % 100) as u16);
        index.insert(index.make_key(vec![Value::Int(k)]).unwrap(), rid).unwrap();
    }

    for k in 0..1000 {
        let key = index.make_key(vec![Value::Int(k)]).unwrap();
        assert_eq!(
            index.search(&key).unwrap(),
            Some(Rid::new(1 + (k / 100) as u32, (k % 100) as u16)),
            "key {}",
            k
        );
    }

    // Range over the middle, inclusive on both ends
    let start = index.make_key(vec![Value::Int(200)]).unwrap();
    let end = index.make_key(vec![Value::Int(300)]).unwrap();
    let rids: Vec<_> = index
        .range_query(&start, &end)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rids.len(), 101);

    // Random deletion order must keep the tree consistent throughout
    keys.shuffle(&mut rng);
    for (i, &k) in keys.iter().enumerate() {
        let key = index.make_key(vec![Value::Int(k)]).unwrap();
        assert!(index.delete(&key).unwrap(), "delete {}", k);
        if i % 100 == 0 {
            for &remaining in &keys[i + 1..] {
                let key = index.make_key(vec![Value::Int(remaining)]).unwrap();
                assert!(index.search(&key).unwrap().is_some(), "key {} lost", remaining);
            }
        }
    }

    let start = index.make_key(vec![Value::Int(0)]).unwrap();
    let end = index.make_key(vec![Value::Int(999)]).unwrap();
    assert_eq!(index.range_query(&start, &end).unwrap().count(), 0);
}

#[test]
fn unique_violation_leaves_index_unchanged() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let descriptor = IndexDescriptor::new("pkey", vec!["id".to_string()], true);
    let index = BTreeIndex::create(&config, "nums", &descriptor).unwrap();

    for i in 0..50 {
        index
            .insert(index.make_key(vec![Value::Int(i)]).unwrap(), Rid::new(1, i as u16))
            .unwrap();
    }
    let nodes_before = index.node_count();

    let err = index
        .insert(index.make_key(vec![Value::Int(25)]).unwrap(), Rid::new(9, 9))
        .unwrap_err();
    assert!(matches!(err, MarrowError::DuplicateKey(_)));

    assert_eq!(index.node_count(), nodes_before);
    let key = index.make_key(vec![Value::Int(25)]).unwrap();
    assert_eq!(index.search(&key).unwrap(), Some(Rid::new(1, 25)));
}

#[test]
fn reopen_everything_after_flush() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let schema = users_schema();
    let descriptor = IndexDescriptor::new("pkey", vec!["id".to_string()], true);

    let mut rids = Vec::new();
    {
        let heap = HeapFile::create(&config, "users").unwrap();
        let index = BTreeIndex::create(&config, "users", &descriptor).unwrap();
        for i in 0..100 {
            let values = user_tuple(i, &format!("user-{:04}", i), None);
            let encoded = encode_tuple(&values, &schema, config.max_tuple_size).unwrap();
            let rid = heap.insert_tuple(&encoded).unwrap();
            index.insert(index.make_key(vec![Value::Int(i)]).unwrap(), rid).unwrap();
            rids.push(rid);
        }
        heap.flush().unwrap();
    }

    let heap = HeapFile::open(&config, "users").unwrap();
    let index = BTreeIndex::open(&config, "users", &descriptor).unwrap();

    for (i, rid) in rids.iter().enumerate() {
        let key = index.make_key(vec![Value::Int(i as i32)]).unwrap();
        assert_eq!(index.search(&key).unwrap(), Some(*rid));
        let decoded = decode_tuple(&heap.read_tuple(*rid).unwrap(), &schema).unwrap();
        assert_eq!(decoded[0], Some(Value::Int(i as i32)));
    }
}

#[test]
fn pool_hit_rate_improves_on_rescan() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let schema = users_schema();
    let heap = HeapFile::create(&config, "users").unwrap();

    let mut rids = Vec::new();
    for i in 0..50 {
        let values = user_tuple(i, "x", None);
        let encoded = encode_tuple(&values, &schema, config.max_tuple_size).unwrap();
        rids.push(heap.insert_tuple(&encoded).unwrap());
    }

    for rid in &rids {
        heap.read_tuple(*rid).unwrap();
    }
    let stats = heap.pool_stats();
    assert!(stats.hit_count > 0);
    assert!(stats.hit_rate() > 0.5, "hit rate was {}", stats.hit_rate());
}

#[test]
fn null_round_trip_through_heap() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let schema = users_schema();
    let heap = HeapFile::create(&config, "users").unwrap();

    let values = user_tuple(1, "no-email", None);
    let encoded = encode_tuple(&values, &schema, config.max_tuple_size).unwrap();
    let rid = heap.insert_tuple(&encoded).unwrap();

    let decoded = decode_tuple(&heap.read_tuple(rid).unwrap(), &schema).unwrap();
    assert_eq!(decoded[2], None);
}
