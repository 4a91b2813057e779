// SPDX-FileCopyrightText: 2026 Thunder Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Property test: mirrored bytes read back exactly and replay to the same
//! contents in the block store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use proptest::collection::vec;
use proptest::prelude::*;

use thunder_core::BlockStore;
use thunder_storage::MemoryBlockStore;
use thunder_vfs::{BlockFileSystem, OpenOptions, VfsOptions};

static NEXT_VFS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
enum Op {
    Write(u64, Vec<u8>),
    Truncate(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u64..20_000, vec(any::<u8>(), 1..6_000)).prop_map(|(o, b)| Op::Write(o, b)),
        1 => (0u64..20_000).prop_map(Op::Truncate),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn writes_read_back_and_replay_identically(ops in vec(op(), 1..10)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = Arc::new(MemoryBlockStore::new());
            let name = format!(
                "thunder-prop-{}-{}",
                std::process::id(),
                NEXT_VFS.fetch_add(1, Ordering::SeqCst)
            );
            let fs = BlockFileSystem::open(
                store.clone(),
                VfsOptions { name, max_idle_files: 2 },
            )
            .await
            .unwrap();

            let core = fs.core();
            let create = OpenOptions { create: true, ..OpenOptions::default() };
            let handle = core.open(Some("/prop.db"), create).unwrap();
            let mut model: Vec<u8> = Vec::new();

            for op in &ops {
                match op {
                    Op::Write(offset, bytes) => {
                        core.write(handle, bytes, *offset).unwrap();
                        let start = *offset as usize;
                        if model.len() < start + bytes.len() {
                            model.resize(start + bytes.len(), 0);
                        }
                        model[start..start + bytes.len()].copy_from_slice(bytes);

                        let mut back = vec![0u8; bytes.len()];
                        core.read(handle, &mut back, *offset).unwrap();
                        assert_eq!(&back, bytes);
                    }
                    Op::Truncate(length) => {
                        core.truncate(handle, *length).unwrap();
                        model.resize(*length as usize, 0);
                    }
                }
                assert_eq!(core.size(handle).unwrap(), model.len() as u64);
            }
            core.close(handle).unwrap();
            fs.flush().await.unwrap();

            let record = store.file("/prop.db").await.unwrap().unwrap();
            assert_eq!(record.length, model.len() as u64);
            let persisted = store.read_file(record.id, record.length).await.unwrap();
            assert!(persisted == model, "persisted contents differ from the mirror");
        });
    }
}
