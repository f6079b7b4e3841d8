//! Application wiring and command execution

use crate::cli::Command;
use anyhow::{bail, Context, Result};
use config::{Config, ConfigValidator};
use serde_json::{json, Value};
use store::{query::parse_filters, BundleQuery, BundleStore, Database, ReaderProducer, SqliteBundleStorage};
use tracing::{info, warn};
use types::utils;

/// Configured database and bundle store
pub struct Application {
    database: Database,
    store: BundleStore<SqliteBundleStorage>,
}

impl Application {
    /// Create a new application instance
    pub async fn new(config: Config) -> Result<Self> {
        let report = ConfigValidator::validate(&config);
        for issue in &report.warnings {
            warn!(field = %issue.field, "{}", issue.message);
        }
        if report.has_errors() {
            let details: Vec<String> = report
                .errors
                .iter()
                .map(|issue| format!("{}: {}", issue.field, issue.message))
                .collect();
            bail!("Invalid configuration: {}", details.join("; "));
        }

        let database = Database::new(&config.database)
            .await
            .context("Failed to initialize database")?;

        database
            .migrate()
            .await
            .context("Failed to run database migrations")?;

        let store = BundleStore::new(SqliteBundleStorage::new(&database), config.storage.data_root());

        info!(
            data_location = %store.data_location().display(),
            "Application components initialized"
        );

        Ok(Self { database, store })
    }

    /// Execute one command, returning its JSON result
    pub async fn run(&self, command: Command) -> Result<Value> {
        match command {
            Command::Migrate => {
                self.database.migrate().await?;
                self.database.health_check().await?;
                Ok(json!({ "status": "ok" }))
            }

            Command::Create {
                scope,
                name,
                filters,
                payload,
                key,
            } => {
                let key = key.unwrap_or_else(utils::generate_bundle_key);
                let bundle_id = self
                    .store
                    .create_bundle(
                        scope.gamespace,
                        scope.version_id,
                        &name,
                        parse_json("filters", &filters)?,
                        parse_json("payload", &payload)?,
                        &key,
                    )
                    .await?;
                Ok(json!({ "bundle_id": bundle_id, "key": key }))
            }

            Command::Get { gamespace, bundle_id } => {
                let bundle = self.store.get_bundle(gamespace, bundle_id).await?;
                Ok(serde_json::to_value(bundle)?)
            }

            Command::Find { scope, name } => {
                let bundle = self
                    .store
                    .find_bundle(scope.gamespace, scope.version_id, &name)
                    .await?;
                Ok(serde_json::to_value(bundle)?)
            }

            Command::List {
                scope,
                status,
                filters,
                offset,
                limit,
                count,
            } => {
                let mut query = BundleQuery::new(scope.gamespace, scope.version_id).with_page(offset, limit);
                if let Some(status) = status {
                    query = query.with_status(status);
                }
                if let Some(raw) = filters {
                    query = query.with_filters(parse_filters(&raw)?);
                }

                let page = self.store.query_bundles(&query, count).await?;
                Ok(serde_json::to_value(page)?)
            }

            Command::Properties {
                gamespace,
                bundle_id,
                filters,
                payload,
            } => {
                self.store
                    .update_bundle_properties(
                        gamespace,
                        bundle_id,
                        parse_json("filters", &filters)?,
                        parse_json("payload", &payload)?,
                    )
                    .await?;
                self.show(gamespace, bundle_id).await
            }

            Command::Status {
                gamespace,
                bundle_id,
                status,
            } => {
                self.store.update_bundle_status(gamespace, bundle_id, status).await?;
                self.show(gamespace, bundle_id).await
            }

            Command::Url {
                gamespace,
                bundle_id,
                url,
                status,
            } => {
                self.store.update_bundle_url(gamespace, bundle_id, status, &url).await?;
                self.show(gamespace, bundle_id).await
            }

            Command::Upload {
                gamespace,
                app_id,
                bundle_id,
                file,
            } => {
                let bundle = self.store.get_bundle(gamespace, bundle_id).await?;
                let source = tokio::fs::File::open(&file)
                    .await
                    .with_context(|| format!("Failed to open {}", file.display()))?;

                let receipt = self
                    .store
                    .upload_bundle(gamespace, app_id, &bundle, &mut ReaderProducer::new(source))
                    .await?;

                Ok(json!({
                    "bundle_id": bundle_id,
                    "hash": receipt.hash,
                    "size": receipt.size,
                    "path": self.store.bundle_path(app_id, &bundle),
                }))
            }

            Command::Delete {
                gamespace,
                app_id,
                bundle_id,
            } => {
                self.store.delete_bundle(gamespace, app_id, bundle_id).await?;
                Ok(json!({ "deleted": bundle_id }))
            }

            Command::ExampleConfig { path } => {
                config::ConfigLoader::create_example(&path)?;
                Ok(json!({ "written": path }))
            }
        }
    }

    async fn show(&self, gamespace: types::GamespaceId, bundle_id: types::BundleId) -> Result<Value> {
        Ok(serde_json::to_value(self.store.get_bundle(gamespace, bundle_id).await?)?)
    }

    /// Close database connections
    pub async fn shutdown(&self) -> Result<()> {
        self.database
            .close()
            .await
            .context("Failed to close database")?;
        info!("Database connections closed");
        Ok(())
    }
}

fn parse_json(field: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{} must be valid JSON", field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Scope;
    use tempfile::TempDir;
    use types::BundleError;

    const SCOPE: Scope = Scope {
        gamespace: 1,
        version_id: 3,
    };

    async fn app() -> (Application, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_location = dir.path().join("bundles").display().to_string();
        config.database.url = format!("sqlite:{}", dir.path().join("dlc.db").display());
        config.database.max_connections = 2;

        (Application::new(config).await.unwrap(), dir)
    }

    fn create(name: &str, filters: &str) -> Command {
        Command::Create {
            scope: SCOPE,
            name: name.to_string(),
            filters: filters.to_string(),
            payload: "{}".to_string(),
            key: None,
        }
    }

    #[tokio::test]
    async fn test_create_upload_and_delete() {
        let (app, dir) = app().await;

        let created = app.run(create("maps", "{}")).await.unwrap();
        let bundle_id = created["bundle_id"].as_i64().unwrap();
        assert_eq!(created["key"].as_str().unwrap().len(), 32);

        let source = dir.path().join("maps.pak");
        std::fs::write(&source, b"abcdef").unwrap();
        let uploaded = app
            .run(Command::Upload {
                gamespace: 1,
                app_id: 9,
                bundle_id,
                file: source,
            })
            .await
            .unwrap();
        assert_eq!(uploaded["size"], 6);

        let shown = app.run(Command::Get { gamespace: 1, bundle_id }).await.unwrap();
        assert_eq!(shown["status"], "UPLOADED");
        assert_eq!(shown["hash"], uploaded["hash"]);

        let artifact = std::path::PathBuf::from(uploaded["path"].as_str().unwrap());
        assert!(artifact.starts_with(dir.path().join("bundles").join("9").join("3")));
        assert!(artifact.exists());

        app.run(Command::Delete {
            gamespace: 1,
            app_id: 9,
            bundle_id,
        })
        .await
        .unwrap();
        assert!(!artifact.exists());

        let err = app.run(Command::Get { gamespace: 1, bundle_id }).await.unwrap_err();
        assert!(err.downcast_ref::<BundleError>().unwrap().is_not_found());

        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_with_filters_and_count() {
        let (app, _dir) = app().await;
        app.run(create("a", r#"{"platform": "ios"}"#)).await.unwrap();
        app.run(create("b", r#"{"platform": "android"}"#)).await.unwrap();
        app.run(create("c", r#"{"platform": "ios"}"#)).await.unwrap();

        let listed = app
            .run(Command::List {
                scope: SCOPE,
                status: None,
                filters: Some(r#"{"platform": "ios"}"#.to_string()),
                offset: 0,
                limit: 1,
                count: true,
            })
            .await
            .unwrap();

        assert_eq!(listed["total"], 2);
        assert_eq!(listed["items"].as_array().unwrap().len(), 1);
        assert_eq!(listed["items"][0]["name"], "c");
    }

    #[tokio::test]
    async fn test_status_and_url_updates() {
        let (app, _dir) = app().await;
        let bundle_id = app.run(create("a", "{}")).await.unwrap()["bundle_id"].as_i64().unwrap();

        let shown = app
            .run(Command::Url {
                gamespace: 1,
                bundle_id,
                url: "https://cdn.example/a".to_string(),
                status: types::BundleStatus::Delivering,
            })
            .await
            .unwrap();
        assert_eq!(shown["status"], "DELIVERING");
        assert_eq!(shown["url"], "https://cdn.example/a");

        let shown = app
            .run(Command::Status {
                gamespace: 1,
                bundle_id,
                status: types::BundleStatus::Delivered,
            })
            .await
            .unwrap();
        assert_eq!(shown["status"], "DELIVERED");
        assert_eq!(shown["url"], "https://cdn.example/a");
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let (app, _dir) = app().await;

        assert!(app.run(create("a", "not json")).await.is_err());

        let err = app.run(create("a", "[1, 2]")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BundleError>(),
            Some(BundleError::Validation(_))
        ));

        app.run(create("a", "{}")).await.unwrap();
        let err = app.run(create("a", "{}")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BundleError>(),
            Some(BundleError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"").unwrap();

        let mut config = Config::default();
        config.storage.data_location = file.display().to_string();
        config.database.url = format!("sqlite:{}", dir.path().join("dlc.db").display());

        assert!(Application::new(config).await.is_err());
    }
}
