//! Big Object Tests
//!
//! Chunked streaming of values larger than a single PUT.

mod common;

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use kinetic::client::{chunk_key, manifest_key, Manifest};
use kinetic::{BigObject, Entry, KineticError};
use tempfile::tempfile;

use common::{connect, start_simulator};

const MIB: usize = 1024 * 1024;

#[test]
fn test_ten_mebibytes_of_zeros() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    let big = BigObject::new(&client);

    let mut source: File = tempfile().unwrap();
    source.write_all(&vec![0u8; 10 * MIB]).unwrap();
    source.seek(SeekFrom::Start(0)).unwrap();

    assert_eq!(big.putx(b"zeros", &mut source).unwrap(), (10 * MIB) as u64);

    let manifest = big.manifest(b"zeros").unwrap();
    assert_eq!(manifest.chunk_count, 10);
    assert_eq!(manifest.total_bytes, (10 * MIB) as u64);

    let mut sink: File = tempfile().unwrap();
    assert_eq!(big.getx(b"zeros", &mut sink).unwrap(), (10 * MIB) as u64);
    assert_eq!(sink.metadata().unwrap().len(), (10 * MIB) as u64);

    let mut read_back = Vec::with_capacity(10 * MIB);
    sink.seek(SeekFrom::Start(0)).unwrap();
    sink.read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back.len(), 10 * MIB);
    assert!(read_back.iter().all(|&b| b == 0x00));

    assert_eq!(big.deletex(b"zeros").unwrap(), 11);
    assert!(matches!(big.manifest(b"zeros"), Err(KineticError::NotFound)));
    assert!(client.get(&chunk_key(b"zeros", 0)).unwrap().is_none());
}

#[test]
fn test_uneven_tail_round_trip() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    let big = BigObject::with_chunk_size(&client, 1000).unwrap();

    let data: Vec<u8> = (0..4321u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(big.putx(b"obj", Cursor::new(&data)).unwrap(), 4321);

    let manifest = big.manifest(b"obj").unwrap();
    assert_eq!(manifest.chunk_size, 1000);
    assert_eq!(manifest.chunk_count, 5);

    let chunk = client.get(&chunk_key(b"obj", 4)).unwrap().unwrap();
    assert_eq!(chunk.value.len(), 321);
    assert_eq!(chunk.version(), 4u64.to_be_bytes());

    let mut out = Vec::new();
    big.getx(b"obj", &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_empty_source_stores_only_manifest() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    let big = BigObject::new(&client);

    assert_eq!(big.putx(b"empty", std::io::empty()).unwrap(), 0);
    assert_eq!(big.manifest(b"empty").unwrap().chunk_count, 0);

    let mut out = Vec::new();
    assert_eq!(big.getx(b"empty", &mut out).unwrap(), 0);
    assert!(out.is_empty());
    assert_eq!(big.deletex(b"empty").unwrap(), 1);
}

#[test]
fn test_missing_chunk_is_corruption() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    let big = BigObject::with_chunk_size(&client, 100).unwrap();

    big.putx(b"holey", Cursor::new(vec![7u8; 350])).unwrap();
    assert!(client.delete_forced(&chunk_key(b"holey", 2)).unwrap());

    let mut out = Vec::new();
    assert!(matches!(
        big.getx(b"holey", &mut out),
        Err(KineticError::CorruptBigObject(_))
    ));

    // Remaining entries: chunks 0, 1, 3 and the manifest
    assert_eq!(big.deletex(b"holey").unwrap(), 4);
}

#[test]
fn test_missing_manifest_is_not_found() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    let big = BigObject::new(&client);

    let mut out = Vec::new();
    assert!(matches!(big.getx(b"nothing", &mut out), Err(KineticError::NotFound)));
    assert!(matches!(big.deletex(b"nothing"), Err(KineticError::NotFound)));
    assert!(client.get(&manifest_key(b"nothing")).unwrap().is_none());
}

#[test]
fn test_invalid_chunk_size() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    assert!(BigObject::with_chunk_size(&client, 0).is_err());
    assert!(BigObject::with_chunk_size(&client, MIB + 1).is_err());
}

#[test]
fn test_shorter_overwrite_removes_stale_chunks() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    let big = BigObject::with_chunk_size(&client, 4).unwrap();

    big.putx(b"obj", Cursor::new(b"abcdefghijkl".to_vec())).unwrap();
    assert_eq!(big.manifest(b"obj").unwrap().chunk_count, 3);

    big.putx(b"obj", Cursor::new(b"xy".to_vec())).unwrap();
    let manifest = big.manifest(b"obj").unwrap();
    assert_eq!(manifest.chunk_count, 1);
    assert_eq!(manifest.last_chunk_bytes, 2);
    assert!(client.get(&chunk_key(b"obj", 1)).unwrap().is_none());
    assert!(client.get(&chunk_key(b"obj", 2)).unwrap().is_none());

    let mut out = Vec::new();
    big.getx(b"obj", &mut out).unwrap();
    assert_eq!(out, b"xy");
}

#[test]
fn test_deletex_sweeps_chunks_past_manifest() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    let big = BigObject::with_chunk_size(&client, 4).unwrap();

    big.putx(b"obj", Cursor::new(b"xy".to_vec())).unwrap();
    // Leftovers of an overwrite that stopped before cleanup
    for index in [1u64, 2] {
        client.put_forced(&Entry::new(chunk_key(b"obj", index), "stale")).unwrap();
    }
    // Neighbouring keys that are not chunks of this object survive
    client.put_forced(&Entry::new("objective", "keep")).unwrap();

    assert_eq!(big.deletex(b"obj").unwrap(), 4);
    assert!(client.get(&chunk_key(b"obj", 1)).unwrap().is_none());
    assert!(client.get(&chunk_key(b"obj", 2)).unwrap().is_none());
    assert!(client.get(b"objective").unwrap().is_some());
}

#[test]
fn test_inconsistent_manifest_is_corruption() {
    let simulator = start_simulator();
    let client = connect(&simulator);
    let big = BigObject::with_chunk_size(&client, 4).unwrap();

    // Checksum is valid but the chunk count disagrees with the length
    let mut manifest = Manifest::describe(b"bad", 4, 2);
    manifest.chunk_count = 2;
    client
        .put_forced(&Entry::new(manifest_key(b"bad"), manifest.encode().unwrap()))
        .unwrap();
    for index in [0u64, 1] {
        client.put_forced(&Entry::new(chunk_key(b"bad", index), "ab")).unwrap();
    }

    let mut out = Vec::new();
    assert!(matches!(
        big.getx(b"bad", &mut out),
        Err(KineticError::CorruptBigObject(_))
    ));
    assert!(out.is_empty());

    // A manifest copied from another base key is rejected too
    let foreign = Manifest::describe(b"other", 4, 2);
    client
        .put_forced(&Entry::new(manifest_key(b"bad"), foreign.encode().unwrap()))
        .unwrap();
    assert!(matches!(big.manifest(b"bad"), Err(KineticError::CorruptBigObject(_))));
}
