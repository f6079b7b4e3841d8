//! Bundle lifecycle service: creation, mutation, upload and deletion

use crate::query::BundleQuery;
use crate::storage::BundleStorage;
use crate::upload::{BundleProducer, UploadReceipt, UploadSink};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use types::{
    ensure_mapping, utils, AppId, BundleError, BundleId, BundlePage, BundleRecord, BundleStatus,
    GamespaceId, NewBundle, Result, VersionId,
};

/// Owns bundle metadata and the artifacts under `data_location`
#[derive(Debug, Clone)]
pub struct BundleStore<S> {
    storage: S,
    data_location: PathBuf,
}

impl<S: BundleStorage> BundleStore<S> {
    pub fn new(storage: S, data_location: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            data_location: data_location.into(),
        }
    }

    pub fn data_location(&self) -> &Path {
        &self.data_location
    }

    /// `{data_location}/{app_id}/{version_id}`
    pub fn bundle_directory(&self, app_id: AppId, version_id: VersionId) -> PathBuf {
        self.data_location
            .join(app_id.to_string())
            .join(version_id.to_string())
    }

    /// `{data_location}/{app_id}/{version_id}/{bundle_id}_{key}`
    pub fn bundle_path(&self, app_id: AppId, bundle: &BundleRecord) -> PathBuf {
        self.bundle_directory(app_id, bundle.version_id)
            .join(bundle.file_name())
    }

    #[instrument(skip(self))]
    pub async fn get_bundle(&self, gamespace_id: GamespaceId, bundle_id: BundleId) -> Result<BundleRecord> {
        self.storage
            .get_bundle(gamespace_id, bundle_id)
            .await?
            .ok_or_else(|| BundleError::not_found_id(gamespace_id, bundle_id))
    }

    #[instrument(skip(self))]
    pub async fn find_bundle(
        &self,
        gamespace_id: GamespaceId,
        version_id: VersionId,
        name: &str,
    ) -> Result<BundleRecord> {
        self.storage
            .find_bundle(gamespace_id, version_id, name)
            .await?
            .ok_or_else(|| BundleError::not_found_name(gamespace_id, version_id, name))
    }

    /// All bundles of a version, newest first
    #[instrument(skip(self))]
    pub async fn list_bundles(&self, gamespace_id: GamespaceId, version_id: VersionId) -> Result<Vec<BundleRecord>> {
        let page = self
            .storage
            .query_many(&BundleQuery::new(gamespace_id, version_id), false)
            .await?;
        Ok(page.items)
    }

    /// Start a filtered lookup over one version
    pub fn query(&self, gamespace_id: GamespaceId, version_id: VersionId) -> BundleQuery {
        BundleQuery::new(gamespace_id, version_id)
    }

    /// First match of `query`, if any
    pub async fn query_bundle(&self, query: &BundleQuery) -> Result<Option<BundleRecord>> {
        self.storage.query_one(query).await
    }

    /// Matches of `query`, with the pagination-independent total when `count` is set
    pub async fn query_bundles(&self, query: &BundleQuery, count: bool) -> Result<BundlePage> {
        self.storage.query_many(query, count).await
    }

    /// Create a bundle in CREATED status and return its id
    ///
    /// The name check happens before the insert and is not atomic with it;
    /// the unique index on the table catches a concurrent duplicate.
    #[instrument(skip(self, filters, payload))]
    pub async fn create_bundle(
        &self,
        gamespace_id: GamespaceId,
        version_id: VersionId,
        name: &str,
        filters: Value,
        payload: Value,
        key: &str,
    ) -> Result<BundleId> {
        let filters = ensure_mapping("bundle_filters", filters)?;
        let payload = ensure_mapping("bundle_payload", payload)?;

        if !utils::is_valid_bundle_key(key) {
            return Err(BundleError::Validation(format!("invalid bundle key: {:?}", key)));
        }

        match self.find_bundle(gamespace_id, version_id, name).await {
            Ok(_) => {
                return Err(BundleError::Conflict(
                    "Bundle with such name already exists".to_string(),
                ))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let bundle_id = self
            .storage
            .insert_bundle(&NewBundle {
                gamespace_id,
                version_id,
                name: name.to_string(),
                filters,
                payload,
                key: key.to_string(),
            })
            .await?;

        info!(bundle_id, "Bundle created");
        Ok(bundle_id)
    }

    /// Replace filters and payload; status and content are untouched
    #[instrument(skip(self, filters, payload))]
    pub async fn update_bundle_properties(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        filters: Value,
        payload: Value,
    ) -> Result<()> {
        let filters = ensure_mapping("bundle_filters", filters)?;
        let payload = ensure_mapping("bundle_payload", payload)?;

        self.storage
            .update_properties(gamespace_id, bundle_id, &filters, &payload)
            .await
    }

    /// Publish hash, status and size in one update
    #[instrument(skip(self))]
    pub async fn update_bundle(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        hash: &str,
        status: BundleStatus,
        size: u64,
    ) -> Result<()> {
        let size = i64::try_from(size)
            .map_err(|_| BundleError::Validation(format!("bundle size {} out of range", size)))?;
        self.storage
            .update_content(gamespace_id, bundle_id, hash, status, size)
            .await
    }

    #[instrument(skip(self))]
    pub async fn update_bundle_status(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        status: BundleStatus,
    ) -> Result<()> {
        self.storage.update_status(gamespace_id, bundle_id, status).await
    }

    /// Set status and delivery url together, typically entering DELIVERING
    #[instrument(skip(self))]
    pub async fn update_bundle_url(
        &self,
        gamespace_id: GamespaceId,
        bundle_id: BundleId,
        status: BundleStatus,
        url: &str,
    ) -> Result<()> {
        self.storage.update_url(gamespace_id, bundle_id, status, url).await
    }

    /// Remove the artifact (best effort) and then the metadata row
    #[instrument(skip(self))]
    pub async fn delete_bundle(&self, gamespace_id: GamespaceId, app_id: AppId, bundle_id: BundleId) -> Result<()> {
        let bundle = self.get_bundle(gamespace_id, bundle_id).await?;
        let path = self.bundle_path(app_id, &bundle);

        // Removal failures of any kind never block the metadata delete.
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Bundle artifact removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Bundle artifact already absent")
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove bundle artifact"),
        }

        self.storage.delete_bundle(gamespace_id, bundle_id).await?;
        info!("Bundle deleted");
        Ok(())
    }

    /// Stream content from `producer` into the bundle artifact and publish the result
    ///
    /// A producer failure leaves the partial file in place and the record in its
    /// previous status.
    #[instrument(skip(self, bundle, producer), fields(bundle_id = bundle.bundle_id, version_id = bundle.version_id))]
    pub async fn upload_bundle<P>(
        &self,
        gamespace_id: GamespaceId,
        app_id: AppId,
        bundle: &BundleRecord,
        producer: &mut P,
    ) -> Result<UploadReceipt>
    where
        P: BundleProducer + ?Sized,
    {
        let directory = self.bundle_directory(app_id, bundle.version_id);
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| BundleError::storage(&directory, e))?;

        let path = directory.join(bundle.file_name());
        let mut sink = UploadSink::create(&path).await?;

        if let Err(e) = producer.produce(&mut sink).await {
            warn!(
                path = %path.display(),
                bytes_written = sink.bytes_written(),
                error = %e,
                "Bundle upload aborted, partial artifact left in place"
            );
            return Err(e);
        }

        let receipt = sink.finish().await?;
        self.update_bundle(
            gamespace_id,
            bundle.bundle_id,
            &receipt.hash,
            BundleStatus::Uploaded,
            receipt.size,
        )
        .await?;

        info!(
            size = receipt.size,
            hash = %utils::sanitize_for_logging(&receipt.hash),
            "Bundle uploaded"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::storage::SqliteBundleStorage;
    use crate::upload::ChunkProducer;
    use async_trait::async_trait;
    use serde_json::json;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;
    use types::JsonMap;

    const GS: GamespaceId = 1;
    const VERSION: VersionId = 5;
    const APP: AppId = 77;

    async fn test_store() -> (BundleStore<SqliteBundleStorage>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let store = BundleStore::new(SqliteBundleStorage::new(&db), dir.path().join("bundles"));
        (store, dir)
    }

    async fn create(store: &BundleStore<SqliteBundleStorage>, name: &str) -> BundleId {
        store
            .create_bundle(GS, VERSION, name, json!({}), json!({}), "k")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let (store, _dir) = test_store().await;
        let filters = json!({"platform": "ios", "tier": 2});
        let payload = json!({"description": "HD textures", "nested": {"a": [1, 2]}});

        let id = store
            .create_bundle(GS, VERSION, "textures", filters.clone(), payload.clone(), "abc")
            .await
            .unwrap();

        let found = store.find_bundle(GS, VERSION, "textures").await.unwrap();
        assert_eq!(found.bundle_id, id);
        assert_eq!(found.status, BundleStatus::Created);
        assert_eq!(Value::Object(found.filters.clone()), filters);
        assert_eq!(Value::Object(found.payload.clone()), payload);
        assert_eq!(found.key, "abc");
        assert!(found.content().is_none());

        assert_eq!(store.get_bundle(GS, id).await.unwrap(), found);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let (store, _dir) = test_store().await;
        create(&store, "maps").await;

        let err = store
            .create_bundle(GS, VERSION, "maps", json!({}), json!({}), "k2")
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Conflict(_)));

        // Same name is fine in another version or gamespace
        store.create_bundle(GS, VERSION + 1, "maps", json!({}), json!({}), "k").await.unwrap();
        store.create_bundle(GS + 1, VERSION, "maps", json!({}), json!({}), "k").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_mapping_filters_are_rejected() {
        let (store, _dir) = test_store().await;

        for filters in [json!(["a"]), json!("ios"), json!(null)] {
            let err = store
                .create_bundle(GS, VERSION, "bad", filters, json!({}), "k")
                .await
                .unwrap_err();
            assert!(matches!(err, BundleError::Validation(_)));
        }

        let err = store
            .create_bundle(GS, VERSION, "bad", json!({}), json!(42), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Validation(_)));

        for key in ["../escape", "my key/x", "a\\b"] {
            let err = store
                .create_bundle(GS, VERSION, "bad", json!({}), json!({}), key)
                .await
                .unwrap_err();
            assert!(matches!(err, BundleError::Validation(_)), "{}", key);
        }

        assert!(store.list_bundles(GS, VERSION).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_bundles_are_not_found() {
        let (store, _dir) = test_store().await;

        assert!(store.get_bundle(GS, 404).await.unwrap_err().is_not_found());
        assert!(store.find_bundle(GS, VERSION, "nope").await.unwrap_err().is_not_found());
        assert!(store.delete_bundle(GS, APP, 404).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_upload_publishes_hash_and_size() {
        let (store, _dir) = test_store().await;
        let id = create(&store, "assets").await;
        let bundle = store.get_bundle(GS, id).await.unwrap();

        let receipt = store
            .upload_bundle(GS, APP, &bundle, &mut ChunkProducer::new(["ab", "cd", "ef"]))
            .await
            .unwrap();

        let expected = hex::encode(Sha256::digest(b"abcdef"));
        assert_eq!(receipt.hash, expected);

        let uploaded = store.get_bundle(GS, id).await.unwrap();
        assert_eq!(uploaded.status, BundleStatus::Uploaded);
        assert_eq!(uploaded.size, Some(6));
        assert_eq!(uploaded.hash.as_deref(), Some(expected.as_str()));

        let path = store.bundle_path(APP, &uploaded);
        assert!(path.ends_with(format!("77/5/{}_k", id)));
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_reupload_overwrites_artifact() {
        let (store, _dir) = test_store().await;
        let id = create(&store, "assets").await;
        let bundle = store.get_bundle(GS, id).await.unwrap();

        store
            .upload_bundle(GS, APP, &bundle, &mut ChunkProducer::new(["first version"]))
            .await
            .unwrap();
        store
            .upload_bundle(GS, APP, &bundle, &mut ChunkProducer::new(["v2"]))
            .await
            .unwrap();

        let uploaded = store.get_bundle(GS, id).await.unwrap();
        assert_eq!(uploaded.size, Some(2));
        assert_eq!(std::fs::read(store.bundle_path(APP, &uploaded)).unwrap(), b"v2");
    }

    struct FailingProducer;

    #[async_trait]
    impl BundleProducer for FailingProducer {
        async fn produce(&mut self, sink: &mut UploadSink) -> Result<()> {
            sink.write(b"partial").await?;
            Err(BundleError::Producer("connection dropped".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_metadata_untouched() {
        let (store, _dir) = test_store().await;
        let id = create(&store, "assets").await;
        let bundle = store.get_bundle(GS, id).await.unwrap();

        let err = store
            .upload_bundle(GS, APP, &bundle, &mut FailingProducer)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Producer(_)));

        let after = store.get_bundle(GS, id).await.unwrap();
        assert_eq!(after, bundle);
        assert!(store.bundle_path(APP, &bundle).exists());
    }

    #[tokio::test]
    async fn test_upload_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let db = Database::new_in_memory().await.unwrap();
        let store = BundleStore::new(SqliteBundleStorage::new(&db), &blocker);
        let id = create(&store, "assets").await;
        let bundle = store.get_bundle(GS, id).await.unwrap();

        let err = store
            .upload_bundle(GS, APP, &bundle, &mut ChunkProducer::new(["ab"]))
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Storage { .. }));
        assert_eq!(store.get_bundle(GS, id).await.unwrap().status, BundleStatus::Created);
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_artifact() {
        let (store, _dir) = test_store().await;
        let id = create(&store, "assets").await;
        let bundle = store.get_bundle(GS, id).await.unwrap();
        store
            .upload_bundle(GS, APP, &bundle, &mut ChunkProducer::new(["data"]))
            .await
            .unwrap();
        let path = store.bundle_path(APP, &bundle);
        assert!(path.exists());

        store.delete_bundle(GS, APP, id).await.unwrap();

        assert!(!path.exists());
        assert!(store.get_bundle(GS, id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_without_artifact_succeeds() {
        let (store, _dir) = test_store().await;
        let id = create(&store, "never-uploaded").await;

        store.delete_bundle(GS, APP, id).await.unwrap();

        assert!(store.get_bundle(GS, id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_pagination_with_count() {
        let (store, _dir) = test_store().await;
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d", "e"] {
            ids.push(create(&store, name).await);
        }

        let query = store.query(GS, VERSION).with_page(0, 2);
        let page = store.query_bundles(&query, true).await.unwrap();

        assert_eq!(page.total, Some(5));
        let got: Vec<_> = page.items.iter().map(|b| b.bundle_id).collect();
        assert_eq!(got, vec![ids[4], ids[3]]);

        let all = store.list_bundles(GS, VERSION).await.unwrap();
        let all_ids: Vec<_> = all.iter().map(|b| b.bundle_id).collect();
        assert_eq!(all_ids, ids.iter().rev().copied().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_query_by_filters_and_status() {
        let (store, _dir) = test_store().await;
        let ios = store
            .create_bundle(GS, VERSION, "ios", json!({"platform": "ios"}), json!({}), "k")
            .await
            .unwrap();
        store
            .create_bundle(GS, VERSION, "android", json!({"platform": "android"}), json!({}), "k")
            .await
            .unwrap();

        let mut filters = JsonMap::new();
        filters.insert("platform".to_string(), json!("ios"));
        let query = store.query(GS, VERSION).with_filters(filters);
        let found = store.query_bundle(&query).await.unwrap().unwrap();
        assert_eq!(found.bundle_id, ios);

        store.update_bundle_status(GS, ios, BundleStatus::Error).await.unwrap();
        let errored = store
            .query_bundles(&store.query(GS, VERSION).with_status(BundleStatus::Error), false)
            .await
            .unwrap();
        assert_eq!(errored.items.len(), 1);
        assert!(store
            .query_bundle(&store.query(GS, VERSION).with_status(BundleStatus::Delivered))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_status_update_is_idempotent() {
        let (store, _dir) = test_store().await;
        let id = create(&store, "assets").await;
        store.update_bundle(GS, id, "feed", BundleStatus::Uploaded, 4).await.unwrap();

        store.update_bundle_status(GS, id, BundleStatus::Delivered).await.unwrap();
        let once = store.get_bundle(GS, id).await.unwrap();
        store.update_bundle_status(GS, id, BundleStatus::Delivered).await.unwrap();
        let twice = store.get_bundle(GS, id).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.hash.as_deref(), Some("feed"));
        assert_eq!(twice.size, Some(4));
    }

    #[tokio::test]
    async fn test_any_status_may_follow_any_other() {
        let (store, _dir) = test_store().await;
        let id = create(&store, "assets").await;

        for status in [BundleStatus::Delivered, BundleStatus::Created, BundleStatus::Error, BundleStatus::Uploaded] {
            store.update_bundle_status(GS, id, status).await.unwrap();
            assert_eq!(store.get_bundle(GS, id).await.unwrap().status, status);
        }
    }

    #[tokio::test]
    async fn test_update_url_and_properties() {
        let (store, _dir) = test_store().await;
        let id = create(&store, "assets").await;
        store.update_bundle(GS, id, "c0ffee", BundleStatus::Uploaded, 12).await.unwrap();

        store
            .update_bundle_url(GS, id, BundleStatus::Delivering, "https://cdn.example/77/5/a")
            .await
            .unwrap();
        store
            .update_bundle_properties(GS, id, json!({"platform": "pc"}), json!({"note": "x"}))
            .await
            .unwrap();

        let bundle = store.get_bundle(GS, id).await.unwrap();
        assert_eq!(bundle.status, BundleStatus::Delivering);
        assert_eq!(bundle.url.as_deref(), Some("https://cdn.example/77/5/a"));
        assert_eq!(bundle.hash.as_deref(), Some("c0ffee"));
        assert_eq!(bundle.size, Some(12));
        assert_eq!(bundle.filters.get("platform"), Some(&json!("pc")));
        assert_eq!(bundle.payload.get("note"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn test_properties_must_be_mappings() {
        let (store, _dir) = test_store().await;
        let id = create(&store, "assets").await;
        store
            .update_bundle_properties(GS, id, json!({"platform": "pc"}), json!({"note": "x"}))
            .await
            .unwrap();

        for (filters, payload) in [(json!([1]), json!({})), (json!({}), json!([1, 2])), (json!({}), json!("x"))] {
            let err = store
                .update_bundle_properties(GS, id, filters, payload)
                .await
                .unwrap_err();
            assert!(matches!(err, BundleError::Validation(_)));
        }

        // Rejected updates leave the stored properties alone
        let bundle = store.get_bundle(GS, id).await.unwrap();
        assert_eq!(bundle.filters.get("platform"), Some(&json!("pc")));
        assert_eq!(bundle.payload.get("note"), Some(&json!("x")));
    }

    /// Storage whose engine is down
    struct BrokenStorage;

    fn broken<T>() -> Result<T> {
        Err(BundleError::OperationFailed("database is locked".to_string()))
    }

    #[async_trait]
    impl BundleStorage for BrokenStorage {
        async fn get_bundle(&self, _: GamespaceId, _: BundleId) -> Result<Option<BundleRecord>> {
            broken()
        }
        async fn find_bundle(&self, _: GamespaceId, _: VersionId, _: &str) -> Result<Option<BundleRecord>> {
            broken()
        }
        async fn insert_bundle(&self, _: &NewBundle) -> Result<BundleId> {
            panic!("insert must not be reached")
        }
        async fn update_properties(&self, _: GamespaceId, _: BundleId, _: &JsonMap, _: &JsonMap) -> Result<()> {
            broken()
        }
        async fn update_content(&self, _: GamespaceId, _: BundleId, _: &str, _: BundleStatus, _: i64) -> Result<()> {
            broken()
        }
        async fn update_status(&self, _: GamespaceId, _: BundleId, _: BundleStatus) -> Result<()> {
            broken()
        }
        async fn update_url(&self, _: GamespaceId, _: BundleId, _: BundleStatus, _: &str) -> Result<()> {
            broken()
        }
        async fn delete_bundle(&self, _: GamespaceId, _: BundleId) -> Result<()> {
            broken()
        }
        async fn query_one(&self, _: &BundleQuery) -> Result<Option<BundleRecord>> {
            broken()
        }
        async fn query_many(&self, _: &BundleQuery, _: bool) -> Result<BundlePage> {
            broken()
        }
    }

    #[tokio::test]
    async fn test_engine_failures_are_not_not_found() {
        let store = BundleStore::new(BrokenStorage, "/nonexistent");

        let err = store.get_bundle(GS, 1).await.unwrap_err();
        assert!(matches!(err, BundleError::OperationFailed(_)));
        let err = store.find_bundle(GS, VERSION, "a").await.unwrap_err();
        assert!(matches!(err, BundleError::OperationFailed(_)));
        let err = store.list_bundles(GS, VERSION).await.unwrap_err();
        assert!(matches!(err, BundleError::OperationFailed(_)));

        // The name check failing must abort creation
        let err = store
            .create_bundle(GS, VERSION, "a", json!({}), json!({}), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::OperationFailed(_)));

        let err = store
            .update_bundle_status(GS, 1, BundleStatus::Error)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::OperationFailed(_)));
    }
}
