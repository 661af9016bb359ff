//! Tests for the sync context with in-process catalog and store doubles

#[cfg(test)]
mod context_tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use crate::error::{Result, SyncError};
    use crate::layout::{ConfigFileName, ConfigFileType};
    use crate::settings::SyncSettings;
    use crate::sync::{
        CatalogSource, ConfigFileRecord, ConfigSync, GateStatus, MemoryVersionStore, NoopObserver,
        RemoteCatalog, VersionStore,
    };

    /// Catalog source that serves a swappable document
    struct StaticCatalog {
        document: Mutex<Option<String>>,
        fetches: AtomicUsize,
    }

    impl StaticCatalog {
        fn serving(document: &str) -> Self {
            Self {
                document: Mutex::new(Some(document.to_string())),
                fetches: AtomicUsize::new(0),
            }
        }

        fn offline() -> Self {
            Self {
                document: Mutex::new(None),
                fetches: AtomicUsize::new(0),
            }
        }

        fn serve(&self, document: &str) {
            *self.document.lock().unwrap() = Some(document.to_string());
        }
    }

    #[async_trait]
    impl CatalogSource for StaticCatalog {
        async fn fetch_catalog(&self) -> Result<RemoteCatalog> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let document = self.document.lock().unwrap().clone();
            match document {
                Some(document) => RemoteCatalog::from_json(&document),
                None => Err(SyncError::CatalogUnavailable(
                    "connection refused".to_string(),
                )),
            }
        }

        fn describe(&self) -> String {
            "static catalog".to_string()
        }
    }

    fn record(name: &str, file_type: ConfigFileType, version: u64) -> ConfigFileRecord {
        ConfigFileRecord::new(ConfigFileName::parse(name).unwrap(), file_type, version)
    }

    fn settings(temp_dir: &TempDir) -> SyncSettings {
        SyncSettings {
            documents_dir: temp_dir.path().to_path_buf(),
            ..SyncSettings::default()
        }
    }

    fn context(
        temp_dir: &TempDir,
        store: Arc<MemoryVersionStore>,
        catalog: StaticCatalog,
    ) -> ConfigSync {
        ConfigSync::with_parts(settings(temp_dir), store, Arc::new(catalog)).unwrap()
    }

    /// Store that parks every versioned write until released
    struct GatedStore {
        inner: MemoryVersionStore,
        writing: Notify,
        release: Notify,
    }

    #[async_trait]
    impl VersionStore for GatedStore {
        async fn get_config_versions(&self) -> Result<Vec<ConfigFileRecord>> {
            self.inner.get_config_versions().await
        }

        async fn update_config_versions(&self, records: &[ConfigFileRecord]) -> Result<()> {
            self.writing.notify_one();
            self.release.notified().await;
            self.inner.update_config_versions(records).await
        }

        async fn update_config_versions_at(
            &self,
            records: &[ConfigFileRecord],
            last_updated_at: i64,
        ) -> Result<()> {
            self.writing.notify_one();
            self.release.notified().await;
            self.inner
                .update_config_versions_at(records, last_updated_at)
                .await
        }

        async fn last_updated_at(&self) -> Result<i64> {
            self.inner.last_updated_at().await
        }

        async fn set_last_updated_at(&self, last_updated_at: i64) -> Result<()> {
            self.inner.set_last_updated_at(last_updated_at).await
        }
    }

    fn keyed_catalog(server_url: &str, version: u64) -> String {
        format!(
            r#"{{"/a.json": {{"type": "json", "version": {version}, "size": 2, "location": {{"url": "{server_url}/a"}}}}}}"#
        )
    }

    #[tokio::test]
    async fn test_check_during_update_keeps_newer_plan() {
        let mut server = mockito::Server::new_async().await;
        let _file = server
            .mock("GET", "/a")
            .with_body("{}")
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(GatedStore {
            inner: MemoryVersionStore::new(),
            writing: Notify::new(),
            release: Notify::new(),
        });
        let catalog = Arc::new(StaticCatalog::serving(&keyed_catalog(&server.url(), 1)));
        let sync =
            ConfigSync::with_parts(settings(&temp_dir), store.clone(), catalog.clone()).unwrap();

        assert!(sync.is_config_update_available().await.unwrap());
        let updating = tokio::spawn({
            let sync = sync.clone();
            async move { sync.update_config(Arc::new(NoopObserver)).await }
        });

        // The pass is committing v1; the server already publishes v2
        store.writing.notified().await;
        catalog.serve(&keyed_catalog(&server.url(), 2));
        assert!(sync.is_config_update_available().await.unwrap());

        store.release.notify_one();
        updating.await.unwrap().unwrap();

        let plan = sync.pending_plan().unwrap();
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].new_version, 2);
        assert_eq!(
            store.get_config_versions().await.unwrap(),
            vec![record("/a.json", ConfigFileType::Json, 1)]
        );
    }

    #[tokio::test]
    async fn test_finished_update_clears_its_plan() {
        let mut server = mockito::Server::new_async().await;
        let _file = server
            .mock("GET", "/a")
            .with_body("{}")
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryVersionStore::new());
        let sync = context(
            &temp_dir,
            store,
            StaticCatalog::serving(&keyed_catalog(&server.url(), 1)),
        );

        assert!(sync.is_config_update_available().await.unwrap());
        sync.update_config(Arc::new(NoopObserver)).await.unwrap();

        assert!(sync.pending_plan().is_none());
        assert_eq!(sync.get_config("/a.json").await.unwrap(), serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_check_remembers_plan() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryVersionStore::with_records(vec![record(
            "/a.json",
            ConfigFileType::Json,
            1,
        )]));
        let sync = context(
            &temp_dir,
            store,
            StaticCatalog::serving(
                r#"{
                    "/a.json": {"type": "json", "version": 2, "size": 10, "location": {"url": "http://x/a"}},
                    "/b.png": {"type": "image", "version": 1, "size": 5, "location": {"url": "http://x/b"}}
                }"#,
            ),
        );

        assert!(sync.should_check_for_update());
        assert!(sync.is_config_update_available().await.unwrap());
        assert!(!sync.should_check_for_update());

        let plan = sync.pending_plan().unwrap();
        assert_eq!(
            plan.updates
                .iter()
                .map(|u| (u.name.as_str(), u.old_version, u.new_version))
                .collect::<Vec<_>>(),
            vec![("/a.json", 1, 2), ("/b.png", 0, 1)]
        );
        assert_eq!(plan.total_size(), 15);
    }

    #[tokio::test]
    async fn test_up_to_date_store_has_no_update() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryVersionStore::with_records(vec![record(
            "/a.json",
            ConfigFileType::Json,
            2,
        )]));
        let sync = context(
            &temp_dir,
            store,
            StaticCatalog::serving(
                r#"{"/a.json": {"type": "json", "version": 2, "size": 10, "location": {"url": "http://x/a"}}}"#,
            ),
        );

        assert!(!sync.is_config_update_available().await.unwrap());
        // Nothing pending resolves immediately without touching the network
        sync.update_config(Arc::new(NoopObserver)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_catalog_stamp_short_circuits() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryVersionStore::new());
        store.set_last_updated_at(2_000).await.unwrap();
        let sync = context(
            &temp_dir,
            store,
            StaticCatalog::serving(
                r#"{"lastUpdatedAt": 1000, "files": [
                    {"name": "/a.json", "type": "json", "version": 9, "size": 1, "url": "http://x/a"}
                ]}"#,
            ),
        );

        assert!(!sync.is_config_update_available().await.unwrap());
    }

    #[tokio::test]
    async fn test_catalog_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let sync = context(
            &temp_dir,
            Arc::new(MemoryVersionStore::new()),
            StaticCatalog::offline(),
        );

        let err = sync.is_config_update_available().await.unwrap_err();
        assert!(err.is_network());
        assert!(sync.pending_plan().is_none());
    }

    fn write_assets(dir: &std::path::Path) {
        std::fs::create_dir_all(dir.join("json")).unwrap();
        std::fs::create_dir_all(dir.join("images")).unwrap();
        std::fs::write(
            dir.join("base_config.json"),
            r#"{"lastUpdatedAt": 500, "files": [
                {"name": "/university.json", "type": "json", "version": 1, "size": 20, "url": ""},
                {"name": "/logo.png", "type": "image", "version": 1, "size": 3, "url": ""}
            ]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("json/university.json"),
            r#"{"name": "uOttawa"}"#,
        )
        .unwrap();
        std::fs::write(dir.join("images/logo.png"), "png").unwrap();
    }

    #[tokio::test]
    async fn test_seed_then_clear() {
        let temp_dir = TempDir::new().unwrap();
        let assets = TempDir::new().unwrap();
        write_assets(assets.path());

        let store = Arc::new(MemoryVersionStore::new());
        let sync = context(&temp_dir, store.clone(), StaticCatalog::offline());

        // Empty store: the gate cannot open
        assert!(sync.init().await.is_err());

        sync.setup_default_configuration(assets.path())
            .await
            .unwrap();
        assert_eq!(store.last_updated_at().await.unwrap(), 500);

        let config = sync.get_config("/university.json").await.unwrap();
        assert_eq!(config["name"], "uOttawa");
        assert_eq!(sync.status(), GateStatus::Ready);
        assert!(temp_dir.path().join("config/images/logo.png").exists());

        sync.clear_configuration().await.unwrap();
        assert_eq!(sync.status(), GateStatus::Uninitialized);
        assert!(!temp_dir.path().join("config").exists());

        let versions = store.get_config_versions().await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().all(|r| r.version == 0));

        // All versions cleared: nothing to verify, gate opens again
        sync.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleared_configuration_is_offered_again() {
        let temp_dir = TempDir::new().unwrap();
        let assets = TempDir::new().unwrap();
        write_assets(assets.path());

        let store = Arc::new(MemoryVersionStore::new());
        // Server still publishes the seeded catalog stamp
        let sync = context(
            &temp_dir,
            store.clone(),
            StaticCatalog::serving(
                r#"{"lastUpdatedAt": 500, "files": [
                    {"name": "/university.json", "type": "json", "version": 1, "size": 20, "url": "http://x/u"}
                ]}"#,
            ),
        );

        sync.setup_default_configuration(assets.path())
            .await
            .unwrap();
        assert!(!sync.is_config_update_available().await.unwrap());

        sync.clear_configuration().await.unwrap();
        assert_eq!(store.last_updated_at().await.unwrap(), 0);

        assert!(sync.is_config_update_available().await.unwrap());
        let plan = sync.pending_plan().unwrap();
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].name.as_str(), "/university.json");
        assert_eq!(plan.updates[0].old_version, 0);
    }

    #[tokio::test]
    async fn test_seed_without_manifest_fails() {
        let temp_dir = TempDir::new().unwrap();
        let assets = TempDir::new().unwrap();
        let sync = context(
            &temp_dir,
            Arc::new(MemoryVersionStore::new()),
            StaticCatalog::offline(),
        );

        let err = sync
            .setup_default_configuration(assets.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InstallFailed { .. }));
    }
}
