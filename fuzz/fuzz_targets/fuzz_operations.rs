#![no_main]
use arbitrary::{Arbitrary, Unstructured};
use baf_rs::{Archive, ArchiveBuilder, MemoryStorage};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    AddDir { parent: u8, name: u8 },
    AddFile { parent: u8, name: u8, data: Vec<u8> },
    Remove { id: u8 },
    Rename { id: u8, name: u8 },
    Move { id: u8, parent: u8 },
    Replace { id: u8, data: Vec<u8> },
    RemoveTree { id: u8 },
    WriteAt { dir: u8, name: u8, data: Vec<u8> },
}

// Random operation sequences must keep the archive reopenable
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);
    let ops: Vec<Op> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let mut archive = match ArchiveBuilder::new()
        .slots_per_segment(2, 2)
        .sync_barriers(false)
        .create(MemoryStorage::new())
    {
        Ok(archive) => archive,
        Err(_) => return,
    };

    for op in ops.iter().take(64) {
        let _ = match op {
            Op::AddDir { parent, name } => archive
                .add_directory(*parent as u64 % 8, &format!("d{}", name), 0)
                .map(drop),
            Op::AddFile { parent, name, data } => archive
                .add_file(*parent as u64 % 8, &format!("f{}", name), data, 0)
                .map(drop),
            Op::Remove { id } => archive.remove_entry(*id as u64),
            Op::Rename { id, name } => archive.rename_entry(*id as u64, &format!("r{}", name)),
            Op::Move { id, parent } => archive.move_entry(*id as u64, *parent as u64 % 8),
            Op::Replace { id, data } => archive.replace_file_content(*id as u64, data, 0),
            Op::RemoveTree { id } => archive.remove_dir_all(*id as u64),
            Op::WriteAt { dir, name, data } => archive
                .write_file_at(&format!("/w{}/f{}", dir % 4, name), data, 0)
                .map(drop),
        };
    }

    let expected: Vec<_> = archive.entries().cloned().collect();
    let storage = archive.close().expect("close");
    let reopened = Archive::open(storage).expect("reopen after valid operations");
    let actual: Vec<_> = reopened.entries().cloned().collect();
    assert_eq!(expected, actual);
    assert!(reopened.walk().count() == actual.len());
});
