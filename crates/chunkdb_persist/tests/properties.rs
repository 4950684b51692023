//! Property tests: random mutation sequences survive save and load, and
//! incremental saves write exactly the chunks the dirty ledgers name.

use chunkdb_core::Database;
use chunkdb_persist::{AdapterConfig, IncrementalAdapter, SaveStrategy};
use chunkdb_storage::InMemoryKvBackend;
use chunkdb_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

const CHUNK_SIZE: usize = 16;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn config() -> AdapterConfig {
    AdapterConfig::builder()
        .chunk_size(CHUNK_SIZE)
        .megachunk_count(4)
        .build()
        .unwrap()
}

fn expected_ordinals(db: &Database) -> BTreeMap<String, Vec<u64>> {
    db.collections()
        .map(|c| {
            let ordinals: Vec<u64> = c
                .dirty_ids()
                .chunk_ordinals(CHUNK_SIZE)
                .into_iter()
                .collect();
            (c.name().to_string(), ordinals)
        })
        .collect()
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn mutations_round_trip_through_saves(
        batches in prop::collection::vec(mutation_sequence_strategy(1, 25), 1..5)
    ) {
        runtime().block_on(async {
            let backend = InMemoryKvBackend::new();
            let adapter = IncrementalAdapter::new(Arc::new(backend.clone()), config());
            let mut db = Database::new("app");

            for batch in &batches {
                apply_all(&mut db, batch);
                let expected = expected_ordinals(&db);
                let report = adapter.save(&mut db).await.unwrap();
                prop_assert_eq!(report.strategy, SaveStrategy::Incremental);
                for (name, ordinals) in &expected {
                    prop_assert_eq!(&report.data_chunks_written(name), ordinals);
                }
                prop_assert!(!db.has_unsaved_changes());
            }

            let fresh = IncrementalAdapter::new(Arc::new(backend.clone()), config());
            let loaded = fresh.load_database("app").await.unwrap().unwrap();
            assert_same_contents(&db, &loaded);
            Ok(())
        })?;
    }

    #[test]
    fn full_overwrite_matches_incremental_result(
        ops in mutation_sequence_strategy(1, 40)
    ) {
        runtime().block_on(async {
            let incremental = InMemoryKvBackend::new();
            let overwritten = InMemoryKvBackend::new();
            let mut db = Database::new("app");
            apply_all(&mut db, &ops);
            let mut copy = Database::new("app");
            apply_all(&mut copy, &ops);

            IncrementalAdapter::new(Arc::new(incremental.clone()), config())
                .save(&mut db)
                .await
                .unwrap();
            // Seed a foreign database chunk so the save has to overwrite.
            let mut foreign = Database::new("app");
            IncrementalAdapter::new(Arc::new(overwritten.clone()), config())
                .save(&mut foreign)
                .await
                .unwrap();
            let report = IncrementalAdapter::new(Arc::new(overwritten.clone()), config())
                .save(&mut copy)
                .await
                .unwrap();
            prop_assert_eq!(report.strategy, SaveStrategy::FullOverwrite);

            let a = IncrementalAdapter::new(Arc::new(incremental), config())
                .load_database("app")
                .await
                .unwrap()
                .unwrap();
            let b = IncrementalAdapter::new(Arc::new(overwritten), config())
                .load_database("app")
                .await
                .unwrap()
                .unwrap();
            assert_same_contents(&a, &b);
            Ok(())
        })?;
    }
}
