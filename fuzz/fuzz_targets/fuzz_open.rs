#![no_main]
use baf_rs::{Archive, MemoryStorage};
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes must either open or fail cleanly, never panic
fuzz_target!(|data: &[u8]| {
    let mut archive = match Archive::open(MemoryStorage::from_bytes(data.to_vec())) {
        Ok(archive) => archive,
        Err(_) => return,
    };

    let ids: Vec<u64> = archive.entries().map(|e| e.id).collect();
    for id in ids {
        let _ = archive.path_of(id);
        let _ = archive.extract_file(id);
    }
    let _ = archive.walk().count();
    let _ = archive.check(true);
});
