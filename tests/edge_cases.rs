use cdb::{Cdb, CdbHash, CdbWriter, Error};
use std::io::Cursor;
use tempfile::NamedTempFile;

/// Duplicate keys are all stored; `find_one` returns the first match and
/// `iter`/`find_all` surface every one of them in insertion order.
#[test]
fn test_duplicate_keys() -> Result<(), Error> {
    let temp_file = NamedTempFile::new().expect("Failed to create temporary file");
    let file_path = temp_file.path();

    let mut writer = CdbWriter::<_, CdbHash>::create(file_path)?;
    writer.put(b"duplicate", b"value1")?;
    writer.put(b"duplicate", b"value2")?;
    writer.put(b"duplicate", b"value3")?;
    writer.put(b"other", b"other_value")?;
    writer.finalize()?;

    let cdb = Cdb::<_, CdbHash>::open(file_path)?;

    let value = cdb.find_one(b"duplicate")?.expect("Key should exist");
    assert_eq!(value, b"value1", "find_one() should return first value");

    let all = cdb.find_all(b"duplicate")?;
    assert_eq!(all, vec![b"value1".to_vec(), b"value2".to_vec(), b"value3".to_vec()]);

    let duplicates: Vec<_> = cdb
        .iter()
        .filter_map(|r| r.ok())
        .filter(|(k, _)| k == b"duplicate")
        .collect();

    assert_eq!(duplicates.len(), 3, "All duplicates should be in iteration");
    assert_eq!(duplicates[0].1, b"value1");
    assert_eq!(duplicates[1].1, b"value2");
    assert_eq!(duplicates[2].1, b"value3");

    Ok(())
}

/// Keys and values near `MAX_LEN` still round-trip correctly.
#[test]
fn test_large_key_value() -> Result<(), Error> {
    let temp_file = NamedTempFile::new().expect("Failed to create temporary file");
    let file_path = temp_file.path();

    let large_key = vec![b'k'; 10_000];
    let large_value = vec![b'v'; 100_000];

    let mut writer = CdbWriter::<_, CdbHash>::create(file_path)?;
    writer.put(&large_key, &large_value)?;
    writer.put(b"small", b"value")?;
    writer.finalize()?;

    let cdb = Cdb::<_, CdbHash>::open(file_path)?;

    let retrieved_value = cdb.find_one(&large_key)?.expect("Large key should exist");
    assert_eq!(retrieved_value.len(), large_value.len());
    assert_eq!(retrieved_value, large_value);

    let small_value = cdb.find_one(b"small")?.expect("Small key should exist");
    assert_eq!(small_value, b"value");

    Ok(())
}

/// A key/value over `MAX_LEN` is rejected by the writer.
#[test]
fn test_put_rejects_oversized_key() -> Result<(), Error> {
    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;
    let oversized = vec![0u8; cdb::MAX_LEN as usize + 1];
    let result = writer.put(&oversized, b"value");
    assert!(matches!(result, Err(Error::Format(_))));
    Ok(())
}

/// Many entries collide into the same hash table bucket and must all be
/// resolvable via linear probing.
#[test]
fn test_many_entries_same_table() -> Result<(), Error> {
    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;

    for i in 0..1_000 {
        let key = format!("key_{:04}", i);
        let value = format!("value_{:04}", i);
        writer.put(key.as_bytes(), value.as_bytes())?;
    }
    writer.finalize()?;

    let cursor = writer.into_inner()?;
    let cdb = Cdb::<_, CdbHash>::new(cursor)?;

    for i in 0..1_000 {
        let key = format!("key_{:04}", i);
        let expected_value = format!("value_{:04}", i);
        let value = cdb
            .find_one(key.as_bytes())?
            .unwrap_or_else(|| panic!("Key {} should exist", key));
        assert_eq!(
            value,
            expected_value.as_bytes(),
            "Value mismatch for key {}",
            key
        );
    }

    Ok(())
}

/// Iteration order matches insertion order.
#[test]
fn test_iteration_order() -> Result<(), Error> {
    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;

    let entries = vec![
        (b"first".to_vec(), b"1".to_vec()),
        (b"second".to_vec(), b"2".to_vec()),
        (b"third".to_vec(), b"3".to_vec()),
        (b"fourth".to_vec(), b"4".to_vec()),
    ];

    for (k, v) in &entries {
        writer.put(k, v)?;
    }
    writer.finalize()?;

    let cursor = writer.into_inner()?;
    let cdb = Cdb::<_, CdbHash>::new(cursor)?;

    let retrieved: Vec<_> = cdb.iter().collect::<Result<Vec<_>, _>>()?;

    assert_eq!(retrieved.len(), entries.len());
    for (i, (expected_k, expected_v)) in entries.iter().enumerate() {
        assert_eq!(
            &retrieved[i].0, expected_k,
            "Key order mismatch at index {}",
            i
        );
        assert_eq!(
            &retrieved[i].1, expected_v,
            "Value order mismatch at index {}",
            i
        );
    }

    Ok(())
}

/// An empty database is exactly the 2048-byte header and iterates to zero
/// entries.
#[test]
fn test_empty_database_iteration() -> Result<(), Error> {
    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;
    writer.finalize()?;

    let cursor = writer.into_inner()?;
    let cdb = Cdb::<_, CdbHash>::new(cursor)?;

    let count = cdb.iter().count();
    assert_eq!(count, 0, "Empty database should have no entries");

    Ok(())
}

/// Empty keys and empty values are both valid and distinguishable from each
/// other.
#[test]
fn test_only_empty_keys_values() -> Result<(), Error> {
    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;
    writer.put(b"", b"")?;
    writer.put(b"", b"value")?;
    writer.put(b"key", b"")?;
    writer.finalize()?;

    let cursor = writer.into_inner()?;
    let cdb = Cdb::<_, CdbHash>::new(cursor)?;

    let value1 = cdb.find_one(b"")?.expect("Empty key should exist");
    assert_eq!(value1, b"", "First empty key should have empty value");

    let value2 = cdb.find_one(b"key")?.expect("Key should exist");
    assert_eq!(value2, b"", "Key should have empty value");

    let all: Vec<_> = cdb.iter().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(all.len(), 3, "Should have all 3 entries");

    Ok(())
}

/// Using a writer after `finalize()` fails with `WriterFinalized`.
#[test]
fn test_writer_after_finalize() -> Result<(), Error> {
    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;
    writer.put(b"key", b"value")?;
    writer.finalize()?;

    let result = writer.put(b"another", b"value");
    assert!(result.is_err(), "Put after finalize should fail");

    match result {
        Err(Error::WriterFinalized) => {}
        _ => panic!("Expected WriterFinalized error"),
    }

    Ok(())
}

/// `into_inner` before `finalize()` fails with `WriterNotFinalized`.
#[test]
fn test_into_inner_without_finalize() {
    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new())).unwrap();
    writer.put(b"key", b"value").unwrap();

    let result = writer.into_inner();
    assert!(result.is_err(), "into_inner without finalize should fail");

    match result {
        Err(Error::WriterNotFinalized) => {}
        _ => panic!("Expected WriterNotFinalized error"),
    }
}

/// All 256 main-table buckets can hold at least one entry and every one of
/// them is retrievable afterward.
#[test]
fn test_all_hash_tables_coverage() -> Result<(), Error> {
    use std::collections::HashSet;

    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;

    let mut tables_hit = HashSet::new();
    let mut key_num = 0u32;

    while tables_hit.len() < 256 && key_num < 100_000 {
        let key = format!("key_{}", key_num);
        let hash = cdb::cdb_hash(key.as_bytes());
        let table_idx = cdb::hash_mod_256(hash);

        if !tables_hit.contains(&table_idx) {
            writer.put(key.as_bytes(), b"value")?;
            tables_hit.insert(table_idx);
        }
        key_num += 1;
    }

    assert_eq!(
        tables_hit.len(),
        256,
        "Should be able to generate keys for all 256 tables"
    );

    writer.finalize()?;
    let cursor = writer.into_inner()?;
    let cdb = Cdb::<_, CdbHash>::new(cursor)?;

    key_num = 0;
    let mut verified_count = 0;
    while verified_count < 256 && key_num < 100_000 {
        let key = format!("key_{}", key_num);
        if cdb.find_one(key.as_bytes())?.is_some() {
            verified_count += 1;
        }
        key_num += 1;
    }

    assert_eq!(verified_count, 256, "All entries should be retrievable");

    Ok(())
}

/// A single `"single"` -> `"single data"` record produces a file of exactly
/// the size the format predicts: 2048-byte header + one 25-byte record
/// (8-byte length pair + 6-byte key + 11-byte value) + one 16-byte sub-table
/// (2 slots for 1 entry, the other 255 buckets being empty and contributing
/// nothing beyond their header entry).
///
/// There is no `cdbmake`-produced golden file available in this repository
/// to compare against byte-for-byte; this assertion covers the exact-size
/// invariant, which is independent of any golden fixture.
#[test]
fn test_single_record_file_size() -> Result<(), Error> {
    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;
    writer.put(b"single", b"single data")?;
    writer.finalize()?;

    let bytes = writer.into_inner()?.into_inner();
    assert_eq!(bytes.len(), 2089);

    Ok(())
}

/// A key with many colliding entries in its own probe chain (same bucket,
/// different keys) still resolves correctly via `find_all`/`iter_key`.
#[test]
fn test_probe_chain_with_mixed_keys() -> Result<(), Error> {
    let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;

    for i in 0..20 {
        writer.put(format!("shared_{i}").as_bytes(), format!("v{i}").as_bytes())?;
    }
    writer.put(b"target", b"target_value_1")?;
    writer.put(b"target", b"target_value_2")?;
    writer.finalize()?;

    let cursor = writer.into_inner()?;
    let cdb = Cdb::<_, CdbHash>::new(cursor)?;

    let values = cdb.find_all(b"target")?;
    assert_eq!(values, vec![b"target_value_1".to_vec(), b"target_value_2".to_vec()]);

    for i in 0..20 {
        let value = cdb.find_one(format!("shared_{i}").as_bytes())?.unwrap();
        assert_eq!(value, format!("v{i}").as_bytes());
    }

    Ok(())
}
