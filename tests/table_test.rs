//! Skiplist table behavior against a real file: point ops, ordered
//! walks, big values, arrangement, and the commit/rollback/flush
//! pipeline.

mod common;

use std::{io::{Seek, SeekFrom, Write}, sync::Arc};

use rand::Rng;
use shoal_db::{
    utils::HandyRwLock, Direction, DiskHandle, ErrorKind, PageCache, PageCategory,
    DEFAULT_PAGE_SIZE,
};

fn open_cache(dir: &std::path::Path, tables: &[&str]) -> (Arc<DiskHandle>, PageCache) {
    let disk = DiskHandle::open(dir.join("p0"), DEFAULT_PAGE_SIZE, false).unwrap();
    for table in tables {
        disk.create_table(table).unwrap();
    }
    let cache = PageCache::new(disk.clone());
    (disk, cache)
}

#[test]
fn test_set_get_del() {
    common::setup();
    let dir = common::scratch_dir("table_set_get_del");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    cache
        .with_table(b"t", |t| t.set(b"k", b"hello"))
        .unwrap();
    let got = cache.with_table(b"t", |t| t.get(b"k")).unwrap();
    assert_eq!(got, Some(b"hello".to_vec()));

    // empty values round-trip too
    cache.with_table(b"t", |t| t.set(b"empty", b"")).unwrap();
    let got = cache.with_table(b"t", |t| t.get(b"empty")).unwrap();
    assert_eq!(got, Some(Vec::new()));

    assert!(cache.with_table(b"t", |t| t.del(b"k")).unwrap());
    assert!(!cache.with_table(b"t", |t| t.is_key_exist(b"k")).unwrap());
    assert!(!cache.with_table(b"t", |t| t.del(b"k")).unwrap());

    assert!(cache.with_table(b"t", |t| t.del(b"empty")).unwrap());
    assert_eq!(cache.with_table(b"t", |t| t.length()).unwrap(), 0);
}

#[test]
fn test_set_overwrites() {
    common::setup();
    let dir = common::scratch_dir("table_overwrite");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    cache.with_table(b"t", |t| t.set(b"k", b"one")).unwrap();
    cache.with_table(b"t", |t| t.set(b"k", b"two longer")).unwrap();
    assert_eq!(
        cache.with_table(b"t", |t| t.get(b"k")).unwrap(),
        Some(b"two longer".to_vec())
    );
    assert_eq!(cache.with_table(b"t", |t| t.length()).unwrap(), 1);

    assert!(!cache
        .with_table(b"t", |t| t.set_if_no_exist(b"k", b"three"))
        .unwrap());
    assert!(cache
        .with_table(b"t", |t| t.set_if_no_exist(b"fresh", b"three"))
        .unwrap());
    assert_eq!(
        cache.with_table(b"t", |t| t.get(b"fresh")).unwrap(),
        Some(b"three".to_vec())
    );
}

#[test]
fn test_order_and_rang() {
    common::setup();
    let dir = common::scratch_dir("table_order_rang");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    for key in &[b"a".to_vec(), b"aa".to_vec(), b"aaa".to_vec(), b"b".to_vec()] {
        cache.with_table(b"t", |t| t.set(key, b"v")).unwrap();
    }

    // shorter keys sort first, same-length keys lexicographic
    let asc = cache
        .with_table(b"t", |t| t.order(Direction::Forward, 10))
        .unwrap();
    let keys: Vec<Vec<u8>> = asc.into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec![b"a".to_vec(), b"b".to_vec(), b"aa".to_vec(), b"aaa".to_vec()]
    );

    let desc = cache
        .with_table(b"t", |t| t.order(Direction::Backward, 2))
        .unwrap();
    let keys: Vec<Vec<u8>> = desc.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"aaa".to_vec(), b"aa".to_vec()]);

    let rang = cache.with_table(b"t", |t| t.rang(b"a", b"aa")).unwrap();
    let keys: Vec<Vec<u8>> = rang.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"aa".to_vec()]);
}

#[test]
fn test_sorted_traversal_random_keys() {
    common::setup();
    let dir = common::scratch_dir("table_sorted");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    let mut rng = rand::thread_rng();
    let mut expect = Vec::new();
    for i in 0..200 {
        let len = rng.gen_range(1, 12);
        let mut key = vec![0u8; len];
        for b in key.iter_mut() {
            *b = rng.gen_range(b'a', b'z');
        }
        // keep keys unique by suffixing the index
        key.extend_from_slice(format!("{:03}", i).as_bytes());
        cache.with_table(b"t", |t| t.set(&key, b"v")).unwrap();
        expect.push(key);
    }
    expect.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

    let forward: Vec<Vec<u8>> = cache
        .with_table(b"t", |t| t.members())
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(forward, expect);

    // the backward walk is the exact reverse
    let backward: Vec<Vec<u8>> = cache
        .with_table(b"t", |t| t.order(Direction::Backward, 1000))
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    let mut reversed = expect.clone();
    reversed.reverse();
    assert_eq!(backward, reversed);

    assert_eq!(
        cache.with_table(b"t", |t| t.length()).unwrap() as usize,
        expect.len()
    );
}

#[test]
fn test_mixed_set_del_last_op_wins() {
    common::setup();
    let dir = common::scratch_dir("table_mixed");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    for round in 0..20 {
        cache.with_table(b"t", |t| t.set(b"k", b"v")).unwrap();
        cache.with_table(b"t", |t| t.del(b"k")).unwrap();
        if round % 2 == 0 {
            cache.with_table(b"t", |t| t.set(b"k", b"kept")).unwrap();
            assert!(cache.with_table(b"t", |t| t.is_key_exist(b"k")).unwrap());
        } else {
            assert!(!cache.with_table(b"t", |t| t.is_key_exist(b"k")).unwrap());
        }
        cache.with_table(b"t", |t| t.del(b"k")).unwrap();
    }
    assert_eq!(cache.with_table(b"t", |t| t.length()).unwrap(), 0);
}

#[test]
fn test_rename_transfers_value() {
    common::setup();
    let dir = common::scratch_dir("table_rename");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    cache.with_table(b"t", |t| t.set(b"old", b"payload")).unwrap();
    assert!(cache.with_table(b"t", |t| t.rename(b"old", b"new")).unwrap());
    assert!(!cache.with_table(b"t", |t| t.is_key_exist(b"old")).unwrap());
    assert_eq!(
        cache.with_table(b"t", |t| t.get(b"new")).unwrap(),
        Some(b"payload".to_vec())
    );

    // a big value moves by descriptor
    let big: Vec<u8> = (0..DEFAULT_PAGE_SIZE * 2).map(|i| (i % 251) as u8).collect();
    cache.with_table(b"t", |t| t.set(b"bigold", &big)).unwrap();
    assert!(cache
        .with_table(b"t", |t| t.rename(b"bigold", b"bignew"))
        .unwrap());
    assert_eq!(
        cache.with_table(b"t", |t| t.get(b"bignew")).unwrap(),
        Some(big)
    );

    assert!(!cache.with_table(b"t", |t| t.rename(b"ghost", b"x")).unwrap());
}

#[test]
fn test_pattern_limit_point() {
    common::setup();
    let dir = common::scratch_dir("table_scans");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    for key in &["k1", "k2", "k3", "k4", "m1", "m2"] {
        cache
            .with_table(b"t", |t| t.set(key.as_bytes(), key.as_bytes()))
            .unwrap();
    }

    let hits = cache
        .with_table(b"t", |t| t.pattern(b"k1", b"m2", b"k*"))
        .unwrap();
    let keys: Vec<Vec<u8>> = hits.into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec![b"k1".to_vec(), b"k2".to_vec(), b"k3".to_vec(), b"k4".to_vec()]
    );

    let window = cache.with_table(b"t", |t| t.limit(b"k3", 1, 2)).unwrap();
    let keys: Vec<Vec<u8>> = window.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"k2".to_vec(), b"k3".to_vec(), b"k4".to_vec()]);

    let hit = cache
        .with_table(b"t", |t| t.point(b"k1", Direction::Forward, 2))
        .unwrap();
    assert_eq!(hit.unwrap().0, b"k3".to_vec());

    let hit = cache
        .with_table(b"t", |t| t.point(b"m1", Direction::Backward, 1))
        .unwrap();
    assert_eq!(hit.unwrap().0, b"k4".to_vec());
}

#[test]
fn test_multi_set_multi_get_rand() {
    common::setup();
    let dir = common::scratch_dir("table_multi");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..10)
        .map(|i| {
            (
                format!("key{}", i).into_bytes(),
                format!("value{}", i).into_bytes(),
            )
        })
        .collect();
    cache.with_table(b"t", |t| t.multi_set(&pairs)).unwrap();

    let keys: Vec<Vec<u8>> = vec![b"key3".to_vec(), b"ghost".to_vec(), b"key7".to_vec()];
    let got = cache.with_table(b"t", |t| t.multi_get(&keys)).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0], (b"key3".to_vec(), b"value3".to_vec()));
    assert_eq!(got[1], (b"key7".to_vec(), b"value7".to_vec()));

    let picked = cache.with_table(b"t", |t| t.rand()).unwrap().unwrap();
    assert!(pairs.contains(&picked));
}

#[test]
fn test_big_value_roundtrip_and_crc() {
    common::setup();
    let dir = common::scratch_dir("table_big_value");
    let path = dir.join("p0");
    let addr_hint;
    let big: Vec<u8> = (0..DEFAULT_PAGE_SIZE * 3).map(|i| (i % 253) as u8).collect();

    {
        let (disk, mut cache) = open_cache(&dir, &["t"]);
        cache.with_table(b"t", |t| t.set(b"big", &big)).unwrap();
        assert_eq!(
            cache.with_table(b"t", |t| t.get(b"big")).unwrap(),
            Some(big.clone())
        );

        cache.commit();
        cache.flush().unwrap();
        addr_hint = disk.page_count();
        disk.shutdown();
    }

    // flip one byte inside a value page payload, near the page end
    {
        let mut victim = None;
        let disk = DiskHandle::open(&path, DEFAULT_PAGE_SIZE, false).unwrap();
        for addr in 1..addr_hint {
            if let Ok(page) = disk.read_page(addr) {
                if page.head().category == PageCategory::Value {
                    victim = Some(addr);
                    break;
                }
            }
        }
        disk.shutdown();
        let victim = victim.expect("no value page on disk");

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let pos = victim as u64 * DEFAULT_PAGE_SIZE as u64 + DEFAULT_PAGE_SIZE as u64 - 16;
        file.seek(SeekFrom::Start(pos)).unwrap();
        file.write_all(&[0xff]).unwrap();
    }

    let disk = DiskHandle::open(&path, DEFAULT_PAGE_SIZE, false).unwrap();
    let mut cache = PageCache::new(disk);
    let err = cache.with_table(b"t", |t| t.get(b"big")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CrcMismatch);
}

#[test]
fn test_arrangement_after_heavy_deletes() {
    common::setup();
    let dir = common::scratch_dir("table_arrange");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    let value = vec![7u8; 100];
    for i in 0..30 {
        let key = format!("key{:02}", i).into_bytes();
        cache.with_table(b"t", |t| t.set(&key, &value)).unwrap();
    }
    // tombstone more than a quarter of the page
    for i in (0..30).step_by(2) {
        let key = format!("key{:02}", i).into_bytes();
        assert!(cache.with_table(b"t", |t| t.del(&key)).unwrap());
    }

    for i in 0..30 {
        let key = format!("key{:02}", i).into_bytes();
        let got = cache.with_table(b"t", |t| t.get(&key)).unwrap();
        if i % 2 == 0 {
            assert_eq!(got, None);
        } else {
            assert_eq!(got, Some(value.clone()));
        }
    }

    // the reclaimed space takes fresh inserts
    for i in 30..45 {
        let key = format!("key{:02}", i).into_bytes();
        cache.with_table(b"t", |t| t.set(&key, &value)).unwrap();
    }
    assert_eq!(cache.with_table(b"t", |t| t.length()).unwrap(), 30);
}

#[test]
fn test_rollback_discards_staged_writes() {
    common::setup();
    let dir = common::scratch_dir("table_rollback");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    cache.with_table(b"t", |t| t.set(b"keep", b"committed")).unwrap();
    cache.commit();

    cache.with_table(b"t", |t| t.set(b"keep", b"doomed")).unwrap();
    cache.with_table(b"t", |t| t.set(b"gone", b"doomed")).unwrap();
    // staged writes are visible inside the transaction
    assert_eq!(
        cache.with_table(b"t", |t| t.get(b"keep")).unwrap(),
        Some(b"doomed".to_vec())
    );
    cache.rollback();

    assert_eq!(
        cache.with_table(b"t", |t| t.get(b"keep")).unwrap(),
        Some(b"committed".to_vec())
    );
    assert_eq!(cache.with_table(b"t", |t| t.get(b"gone")).unwrap(), None);
}

#[test]
fn test_flush_reopen_preserves_tables() {
    common::setup();
    let dir = common::scratch_dir("table_reopen");
    let path = dir.join("p0");

    {
        let (disk, mut cache) = open_cache(&dir, &["t"]);
        for i in 0..50 {
            let key = format!("key{}", i).into_bytes();
            let value = format!("value{}", i).into_bytes();
            cache.with_table(b"t", |t| t.set(&key, &value)).unwrap();
        }
        cache.commit();
        cache.flush().unwrap();
        disk.shutdown();
    }

    let disk = DiskHandle::open(&path, DEFAULT_PAGE_SIZE, false).unwrap();
    let mut cache = PageCache::new(disk);
    for i in 0..50 {
        let key = format!("key{}", i).into_bytes();
        assert_eq!(
            cache.with_table(b"t", |t| t.get(&key)).unwrap(),
            Some(format!("value{}", i).into_bytes())
        );
    }
    assert_eq!(cache.with_table(b"t", |t| t.length()).unwrap(), 50);
}

#[test]
fn test_table_clear() {
    common::setup();
    let dir = common::scratch_dir("table_clear");
    let (_disk, mut cache) = open_cache(&dir, &["t"]);

    let big: Vec<u8> = vec![3u8; DEFAULT_PAGE_SIZE * 2];
    for i in 0..20 {
        let key = format!("key{}", i).into_bytes();
        cache.with_table(b"t", |t| t.set(&key, b"v")).unwrap();
    }
    cache.with_table(b"t", |t| t.set(b"big", &big)).unwrap();

    cache.with_table(b"t", |t| t.table_clear()).unwrap();
    assert_eq!(cache.with_table(b"t", |t| t.length()).unwrap(), 0);
    assert_eq!(cache.with_table(b"t", |t| t.get(b"big")).unwrap(), None);

    // the table stays usable
    cache.with_table(b"t", |t| t.set(b"again", b"v")).unwrap();
    assert_eq!(
        cache.with_table(b"t", |t| t.get(b"again")).unwrap(),
        Some(b"v".to_vec())
    );
}

#[test]
fn test_two_tables_in_one_file() {
    common::setup();
    let dir = common::scratch_dir("table_two");
    let (_disk, mut cache) = open_cache(&dir, &["first", "second"]);

    cache.with_table(b"first", |t| t.set(b"k", b"1")).unwrap();
    cache.with_table(b"second", |t| t.set(b"k", b"2")).unwrap();

    assert_eq!(
        cache.with_table(b"first", |t| t.get(b"k")).unwrap(),
        Some(b"1".to_vec())
    );
    assert_eq!(
        cache.with_table(b"second", |t| t.get(b"k")).unwrap(),
        Some(b"2".to_vec())
    );

    let err = cache
        .with_table(b"missing", |t| t.get(b"k"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTable);
}

#[test]
fn test_handy_rwlock_shortcut() {
    let lock = std::sync::RwLock::new(5);
    assert_eq!(*lock.rl(), 5);
    *lock.wl() = 6;
    assert_eq!(*lock.rl(), 6);
}
