//! Corruption detection
//!
//! Damages archive bytes directly and checks that open, extract and check
//! report it with the right error kind instead of returning bad data.

use baf_rs::{Archive, ArchiveBuilder, ErrorKind, MemoryStorage, Severity, ROOT};
use rand::Rng;

// Layout of an archive created with 2 directory and 2 file slots per segment
const SEGMENT: usize = 256;
const DIR_SLOT_0: usize = 272;
const DIR_SLOT_1: usize = 552;
const FILE_SLOT_0: usize = 832;
const FILE_SLOT_1: usize = 1160;
const FIRST_BLOB: usize = 1488;

const PARENT: usize = 8;
const ADDRESS: usize = 280;
const LENGTH: usize = 288;

fn small_archive() -> Archive<MemoryStorage> {
    ArchiveBuilder::new()
        .slots_per_segment(2, 2)
        .create(MemoryStorage::new())
        .unwrap()
}

fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn open_kind(bytes: Vec<u8>) -> ErrorKind {
    Archive::open(MemoryStorage::from_bytes(bytes))
        .err()
        .expect("open should fail")
        .kind()
}

/// Archive with one directory and two files, as raw bytes
fn populated_bytes() -> Vec<u8> {
    let mut archive = small_archive();
    let dir = archive.add_directory(ROOT, "dir", 0).unwrap();
    archive.add_file(dir, "a.txt", b"alpha alpha alpha", 0).unwrap();
    archive.add_file(ROOT, "b.txt", b"bravo", 0).unwrap();
    archive.close().unwrap().into_bytes()
}

#[test]
fn test_bad_magic() {
    let mut bytes = populated_bytes();
    bytes[0] = b'X';
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_unsupported_version() {
    let mut bytes = populated_bytes();
    bytes[8..12].copy_from_slice(&2u32.to_le_bytes());
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_reserved_header_bytes_are_ignored() {
    let mut bytes = populated_bytes();
    bytes[12..256].fill(0xAB);

    let mut archive = Archive::open(MemoryStorage::from_bytes(bytes)).unwrap();
    assert_eq!(archive.extract_path("/b.txt").unwrap(), b"bravo");
}

#[test]
fn test_truncated_archives() {
    let bytes = populated_bytes();

    // Shorter than the header
    assert_eq!(open_kind(bytes[..100].to_vec()), ErrorKind::Format);
    // Header only
    assert_eq!(open_kind(bytes[..256].to_vec()), ErrorKind::Format);
    // Segment cut short
    assert_eq!(open_kind(bytes[..1000].to_vec()), ErrorKind::Format);
    // Blobs cut off
    assert_eq!(open_kind(bytes[..FIRST_BLOB + 4].to_vec()), ErrorKind::Format);
}

#[test]
fn test_empty_storage_is_format_error() {
    assert_eq!(open_kind(Vec::new()), ErrorKind::Format);
}

#[test]
fn test_segment_chain_cycle() {
    let mut bytes = populated_bytes();
    put_u64(&mut bytes, SEGMENT, SEGMENT as u64);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_segment_chain_cycle_across_segments() {
    let mut archive = small_archive();
    for i in 0..3 {
        archive.add_file(ROOT, &format!("f{}", i), b"x", 0).unwrap();
    }
    assert_eq!(archive.stats().segments, 2);
    let mut bytes = archive.close().unwrap().into_bytes();

    let second = u64::from_le_bytes(bytes[SEGMENT..SEGMENT + 8].try_into().unwrap()) as usize;
    put_u64(&mut bytes, second, SEGMENT as u64);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_segment_pointer_out_of_bounds() {
    let mut bytes = populated_bytes();
    let len = bytes.len() as u64;

    put_u64(&mut bytes, SEGMENT, len + 4096);
    assert_eq!(open_kind(bytes.clone()), ErrorKind::Format);

    // Into the header
    put_u64(&mut bytes, SEGMENT, 100);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_segment_capacity_beyond_extent() {
    let mut bytes = populated_bytes();
    bytes[SEGMENT + 12..SEGMENT + 16].copy_from_slice(&1000u32.to_le_bytes());
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_content_beyond_extent() {
    let mut bytes = populated_bytes();
    let len = bytes.len() as u64;
    put_u64(&mut bytes, FILE_SLOT_0 + LENGTH, len);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_content_inside_header() {
    let mut bytes = populated_bytes();
    put_u64(&mut bytes, FILE_SLOT_0 + ADDRESS, 16);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_overlapping_content() {
    let mut bytes = populated_bytes();
    // Point the second file at the first file's blob
    put_u64(&mut bytes, FILE_SLOT_1 + ADDRESS, FIRST_BLOB as u64);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_content_overlapping_segment() {
    let mut bytes = populated_bytes();
    put_u64(&mut bytes, FILE_SLOT_0 + ADDRESS, DIR_SLOT_1 as u64);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_duplicate_entry_id() {
    let mut bytes = populated_bytes();
    // Second file takes the directory's id
    put_u64(&mut bytes, FILE_SLOT_1, 1);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_empty_name_in_live_slot() {
    let mut bytes = populated_bytes();
    bytes[DIR_SLOT_0 + 16] = 0;
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_parent_cycle_is_rejected() {
    let mut archive = small_archive();
    let a = archive.add_directory(ROOT, "a", 0).unwrap();
    archive.add_directory(a, "b", 0).unwrap();
    let mut bytes = archive.close().unwrap().into_bytes();

    // a's parent becomes b
    put_u64(&mut bytes, DIR_SLOT_0 + PARENT, 2);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_self_parent_is_rejected() {
    let mut bytes = populated_bytes();
    put_u64(&mut bytes, DIR_SLOT_0 + PARENT, 1);
    assert_eq!(open_kind(bytes), ErrorKind::Format);
}

#[test]
fn test_orphan_opens_with_warning() {
    let mut bytes = populated_bytes();
    // a.txt now points at a parent that does not exist
    put_u64(&mut bytes, FILE_SLOT_0 + PARENT, 77);

    let mut archive = Archive::open(MemoryStorage::from_bytes(bytes)).unwrap();
    let orphan = archive.resolve_path("/dir/a.txt");
    assert!(orphan.is_err());

    // Still reachable by id
    assert_eq!(archive.extract_file(2).unwrap(), b"alpha alpha alpha");

    let report = archive.check(false);
    let warnings: Vec<_> = report.with_severity(Severity::Warning).collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].entry, Some(2));
    assert!(!report.has_errors());
}

#[test]
fn test_file_as_parent_makes_orphan() {
    let mut bytes = populated_bytes();
    // a.txt's parent becomes b.txt, which is a file
    put_u64(&mut bytes, FILE_SLOT_0 + PARENT, 3);

    let mut archive = Archive::open(MemoryStorage::from_bytes(bytes)).unwrap();
    assert!(!archive.check(false).is_healthy());
    assert_eq!(archive.walk().count(), 2);
}

#[test]
fn test_content_corruption_detected_on_extract() {
    let mut archive = small_archive();
    let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let id = archive.add_file(ROOT, "data.bin", &data, 0).unwrap();
    let mut bytes = archive.close().unwrap().into_bytes();

    let mut rng = rand::thread_rng();
    let offset = FIRST_BLOB + rng.gen_range(0..data.len());
    bytes[offset] ^= 1 << rng.gen_range(0..8);

    // Opening does not read content
    let mut archive = Archive::open(MemoryStorage::from_bytes(bytes)).unwrap();
    let err = archive.extract_file(id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);

    let report = archive.check(true);
    assert!(report.has_errors());
    assert_eq!(report.with_severity(Severity::Error).count(), 1);
}

#[test]
fn test_corrupted_checksum_detected() {
    let mut bytes = populated_bytes();
    bytes[FILE_SLOT_1 + 296] ^= 0xFF;

    let mut archive = Archive::open(MemoryStorage::from_bytes(bytes)).unwrap();
    assert_eq!(
        archive.extract_path("/b.txt").unwrap_err().kind(),
        ErrorKind::Integrity
    );
    // The other file is fine
    assert_eq!(
        archive.extract_path("/dir/a.txt").unwrap(),
        b"alpha alpha alpha"
    );
}

#[test]
fn test_streaming_read_reports_corruption() {
    use std::io::Read;

    let mut bytes = populated_bytes();
    bytes[FIRST_BLOB] ^= 0x01;

    let mut archive = Archive::open(MemoryStorage::from_bytes(bytes)).unwrap();
    let id = archive.resolve_path("/dir/a.txt").unwrap();

    let mut out = Vec::new();
    let err = archive.open_file(id).unwrap().read_to_end(&mut out).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn test_healthy_archive_check() {
    let mut archive = Archive::open(MemoryStorage::from_bytes(populated_bytes())).unwrap();
    let report = archive.check(true);
    assert!(report.is_healthy());
    assert!(report.is_empty());
}

#[test]
fn test_unreferenced_bytes_become_free_space() {
    let mut bytes = populated_bytes();
    let before = bytes.len();
    // Content written but never committed
    bytes.extend_from_slice(&[0xEE; 64]);

    let archive = Archive::open(MemoryStorage::from_bytes(bytes)).unwrap();
    let stats = archive.stats();
    assert_eq!(stats.extent, before as u64 + 64);
    assert_eq!(stats.free_bytes, 64);
}

#[test]
fn test_largest_entry_id_opens_and_exhausts_ids() {
    let mut bytes = populated_bytes();
    put_u64(&mut bytes, FILE_SLOT_1, u64::MAX);

    let mut archive = Archive::open(MemoryStorage::from_bytes(bytes)).unwrap();
    assert_eq!(archive.resolve_path("/b.txt").unwrap(), u64::MAX);
    assert_eq!(archive.extract_file(u64::MAX).unwrap(), b"bravo");
    assert_eq!(archive.walk().count(), 3);

    assert_eq!(
        archive.add_directory(ROOT, "more", 0).unwrap_err().kind(),
        ErrorKind::Allocation
    );
    assert_eq!(
        archive.add_file(ROOT, "more.txt", b"x", 0).unwrap_err().kind(),
        ErrorKind::Allocation
    );
    assert_eq!(archive.entries().count(), 3);

    // Existing entries can still be changed
    archive.rename_entry(u64::MAX, "renamed.txt").unwrap();
    archive.remove_entry(u64::MAX).unwrap();
}
