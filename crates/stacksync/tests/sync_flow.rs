//! End-to-end flow: two stacks diverge, batch checksums localize the
//! divergence, a ranged backup/restore re-syncs them, and full-type digests
//! agree afterwards.

use std::sync::Arc;

use tokio::sync::watch;

use stacksync::{
    BatchChecksumRequest, ColumnValue, Config, FieldSchema, FieldType, IdRange, MemoryStore,
    MigrationManager, MigrationStore, MigrationType, OptimalRangeRequest, RegistryBuilder, Row, TableSchema,
    TypeDescriptor,
};

const NODE: MigrationType = MigrationType(1);
const NODE_ANNOTATION: MigrationType = MigrationType(2);
const CHANGE: MigrationType = MigrationType(9);

fn node_schema() -> TableSchema {
    TableSchema::new(
        "NODE",
        vec![
            FieldSchema::backup_id("ID"),
            FieldSchema::etag("ETAG"),
            FieldSchema::new("NAME", FieldType::Text),
        ],
    )
}

fn annotation_schema() -> TableSchema {
    TableSchema::new(
        "NODE_ANNOTATION",
        vec![
            FieldSchema::backup_id("OWNER_ID"),
            FieldSchema::new("KEY", FieldType::Text),
        ],
    )
}

fn change_schema() -> TableSchema {
    TableSchema::new("CHANGES", vec![FieldSchema::backup_id("CHANGE_NUM")])
}

fn node(id: i64, etag: &str) -> Row {
    Row::new(vec![
        ColumnValue::Int(id),
        ColumnValue::Text(etag.into()),
        ColumnValue::Text(format!("node-{}", id)),
    ])
}

fn annotation(owner: i64, key: &str) -> Row {
    Row::new(vec![ColumnValue::Int(owner), ColumnValue::Text(key.into())])
}

fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new().mark_non_unique("NODE_ANNOTATION", "OWNER_ID"))
}

async fn manager(store: Arc<MemoryStore>) -> MigrationManager {
    let mut builder = RegistryBuilder::new();
    builder.register(
        TypeDescriptor::new(NODE, "NODE", node_schema()).with_secondary(vec![
            TypeDescriptor::new(NODE_ANNOTATION, "NODE_ANNOTATION", annotation_schema()),
        ]),
    );
    builder.register(TypeDescriptor::new(CHANGE, "CHANGE", change_schema()).change_log());
    let registry = builder.build(store.as_ref()).await.expect("registry");

    let yaml = "\
stack: prod
instance: a
migration:
  page_size: 4
  backup_batch_size: 3
";
    let config = Config::from_yaml(yaml).expect("config");
    MigrationManager::new(store, Arc::new(registry), config)
}

fn idle() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn seed_common(store: &MemoryStore) {
    let nodes: Vec<Row> = (1..=20).map(|id| node(id, &format!("etag-{}", id))).collect();
    store.seed(&node_schema(), nodes).expect("seed nodes");
    store
        .seed(
            &annotation_schema(),
            vec![
                annotation(3, "color"),
                annotation(3, "size"),
                annotation(17, "owner"),
            ],
        )
        .expect("seed annotations");
}

#[tokio::test]
async fn divergence_is_found_localized_and_repaired() {
    init_tracing();
    let source_store = store();
    let target_store = store();
    seed_common(&source_store);
    seed_common(&target_store);

    // The stacks drift apart: an update, a delete, and an orphan dependent,
    // all within ids 11..=17.
    target_store
        .delete_by_range(&node_schema(), IdRange::new(12, 13), &[])
        .await
        .expect("drift delete");
    source_store
        .upsert_batch(&node_schema(), &[node(15, "etag-15-touched")])
        .await
        .expect("drift update");
    target_store
        .seed(&annotation_schema(), vec![annotation(16, "stale")])
        .expect("drift annotation");

    let source = manager(source_store.clone()).await;
    let target = manager(target_store.clone()).await;
    let cancel = idle();

    // Whole-type digests disagree.
    let before_source = source.checksum_for_type(NODE, "salt").await.expect("checksum");
    let before_target = target.checksum_for_type(NODE, "salt").await.expect("checksum");
    assert!(before_source.is_some());
    assert_ne!(before_source, before_target);

    // Binned digests narrow the drift down to the 10..20 bin.
    let request = BatchChecksumRequest {
        migration_type: NODE,
        range: IdRange::new(0, 100),
        batch_size: 10,
        salt: "salt".into(),
    };
    let source_bins = source
        .calculate_batch_checksums(&request)
        .await
        .expect("bins");
    let target_bins = target
        .calculate_batch_checksums(&request)
        .await
        .expect("bins");
    assert_eq!(source_bins.len(), 3);
    assert_eq!(source_bins[0].checksum, target_bins[0].checksum);
    assert_ne!(source_bins[1].checksum, target_bins[1].checksum);
    assert_eq!(source_bins[2].checksum, target_bins[2].checksum);

    // Re-sync the divergent bin with a ranged backup and restore. The bin is
    // [10, 19]; the container range is half-open.
    let divergent = IdRange::new(10, 20);
    let mut container = Vec::new();
    let (manifest, records) = source
        .backup_range(NODE, divergent, &mut container, &cancel)
        .await
        .expect("backup");
    assert_eq!(manifest.range, divergent);
    // 10 nodes on the source side plus one annotation for id 17.
    assert_eq!(records, 11);

    let restored = target
        .restore_stream(container.as_slice(), &cancel)
        .await
        .expect("restore");
    assert_eq!(restored, 11);

    // The stale annotation and the missing node 12 are gone / back.
    assert_eq!(target_store.row_count("NODE"), 20);
    let after_source = source.checksum_for_type(NODE, "salt").await.expect("checksum");
    let after_target = target.checksum_for_type(NODE, "salt").await.expect("checksum");
    assert_eq!(after_source, after_target);

    // Untouched bins still agree under a fresh salt.
    let source_bins = source
        .calculate_batch_checksums(&BatchChecksumRequest {
            salt: "fresh".into(),
            ..request.clone()
        })
        .await
        .expect("bins");
    let target_bins = target
        .calculate_batch_checksums(&BatchChecksumRequest {
            salt: "fresh".into(),
            ..request
        })
        .await
        .expect("bins");
    let source_sums: Vec<&str> = source_bins.iter().map(|b| b.checksum.as_str()).collect();
    let target_sums: Vec<&str> = target_bins.iter().map(|b| b.checksum.as_str()).collect();
    assert_eq!(source_sums, target_sums);
}

#[tokio::test]
async fn optimal_ranges_feed_parallel_backups() {
    init_tracing();
    let source_store = store();
    seed_common(&source_store);
    let source = manager(source_store).await;
    let cancel = idle();

    let counts = source.get_type_counts().await.expect("counts");
    assert_eq!(counts[0].migration_type, NODE);
    assert_eq!(counts[0].count, 20);
    let max_id = counts[0].max_id.expect("max id");

    let ranges = source
        .calculate_optimal_ranges(&OptimalRangeRequest {
            migration_type: NODE,
            minimum_id: counts[0].min_id.expect("min id"),
            maximum_id: max_id + 1,
            optimal_rows_per_range: 8,
        })
        .await
        .expect("ranges");
    assert!(ranges.len() > 1);
    // Ranges are contiguous, disjoint, and cover every id.
    for window in ranges.windows(2) {
        assert_eq!(window[0].maximum_id, window[1].minimum_id);
    }
    assert_eq!(ranges[0].minimum_id, 1);
    assert_eq!(ranges.last().expect("last").maximum_id, max_id + 1);

    // Each range restores independently into an empty target.
    let target_store = store();
    let target = manager(target_store.clone()).await;
    for range in ranges {
        let mut container = Vec::new();
        source
            .backup_range(NODE, range, &mut container, &cancel)
            .await
            .expect("backup");
        target
            .restore_stream(container.as_slice(), &cancel)
            .await
            .expect("restore");
    }

    assert_eq!(target_store.row_count("NODE"), 20);
    assert_eq!(target_store.row_count("NODE_ANNOTATION"), 3);
    assert_eq!(
        source.checksum_for_type(NODE, "salt").await.expect("checksum"),
        target.checksum_for_type(NODE, "salt").await.expect("checksum")
    );
}
