//! File-based configuration storage.
//!
//! Types and sources live in one document per id. Policies live in one
//! document per `(type, location)` scope, so the scope is unique by file name
//! and a lookup reads a single file. Reads take no lock.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::lock;
use crate::domain::{
    AutoGenerationPolicy, IdentifierSource, IdentifierType, IdentifierTypeId, LocationId, PolicyId,
    SourceId,
};
use crate::error::{StorageError, StorageResult};
use crate::storage::traits::ConfigStorage;

const TYPES: &str = "types";
const SOURCES: &str = "sources";
const POLICIES: &str = "policies";
const TYPE_NAMES: &str = "type_names.json";

/// File-based configuration storage implementation.
pub struct FileConfigStorage {
    /// Base directory for configs.
    configs_dir: PathBuf,
}

impl FileConfigStorage {
    /// Create a new file config storage.
    #[must_use]
    pub const fn new(configs_dir: PathBuf) -> Self {
        Self { configs_dir }
    }

    /// Get the file path for a config.
    fn config_path(&self, kind: &str, id: &str) -> PathBuf {
        self.configs_dir
            .join(kind)
            .join(format!("{}.json", lock::sanitize_name(id)))
    }

    /// File of the policy for one scope. Locations are hex encoded so that
    /// distinct locations never share a file name.
    fn policy_path(&self, identifier_type: IdentifierTypeId, location: Option<&LocationId>) -> PathBuf {
        let scope = location.map_or_else(
            || "global".to_string(),
            |location| {
                location
                    .as_str()
                    .bytes()
                    .fold(String::from("at-"), |mut out, b| {
                        let _ = write!(out, "{b:02x}");
                        out
                    })
            },
        );
        self.configs_dir
            .join(POLICIES)
            .join(format!("{identifier_type}_{scope}.json"))
    }

    /// List all configs of a kind. Unreadable files are logged and skipped.
    async fn list_configs<T>(&self, kind: &str) -> StorageResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let dir = self.configs_dir.join(kind);
        lock::blocking(move || list_dir(&dir)).await
    }
}

fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> StorageResult<Vec<T>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut configs = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            match lock::load(&path) {
                Ok(Some(config)) => configs.push(config),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Failed to parse config file");
                }
            }
        }
    }

    Ok(configs)
}

#[async_trait]
impl ConfigStorage for FileConfigStorage {
    async fn create_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()> {
        let key = identifier_type.name.to_ascii_lowercase();
        let id = identifier_type.id;
        let types_dir = self.configs_dir.join(TYPES);

        // The name index is the atomic claim; a claim whose type was never
        // written or has been retired is free again.
        lock::update(
            self.configs_dir.join(TYPE_NAMES),
            move |names: &mut Option<BTreeMap<String, IdentifierTypeId>>| {
                let names = names.get_or_insert_with(BTreeMap::new);
                if let Some(holder) = names.get(&key) {
                    let path = types_dir.join(format!("{holder}.json"));
                    let live = lock::load::<IdentifierType>(&path)?.is_some_and(|t| !t.retired);
                    if live {
                        return Err(StorageError::Conflict(format!(
                            "identifier type '{key}' already exists"
                        )));
                    }
                }
                names.insert(key, id);
                Ok(((), true))
            },
        )
        .await?;

        lock::write(self.config_path(TYPES, &id.to_string()), identifier_type).await
    }

    async fn save_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()> {
        lock::write(
            self.config_path(TYPES, &identifier_type.id.to_string()),
            identifier_type,
        )
        .await
    }

    async fn get_identifier_type(
        &self,
        id: IdentifierTypeId,
    ) -> StorageResult<Option<IdentifierType>> {
        lock::read(self.config_path(TYPES, &id.to_string())).await
    }

    async fn list_identifier_types(&self) -> StorageResult<Vec<IdentifierType>> {
        let mut types: Vec<IdentifierType> = self.list_configs(TYPES).await?;
        types.sort_by_key(|t| t.created_at);
        Ok(types)
    }

    async fn save_source(&self, source: &IdentifierSource) -> StorageResult<()> {
        lock::write(self.config_path(SOURCES, &source.id.to_string()), source).await
    }

    async fn get_source(&self, id: SourceId) -> StorageResult<Option<IdentifierSource>> {
        lock::read(self.config_path(SOURCES, &id.to_string())).await
    }

    async fn list_sources(&self) -> StorageResult<Vec<IdentifierSource>> {
        let mut sources: Vec<IdentifierSource> = self.list_configs(SOURCES).await?;
        sources.sort_by_key(|s| s.created_at);
        Ok(sources)
    }

    async fn save_policy(&self, policy: &AutoGenerationPolicy) -> StorageResult<()> {
        let path = self.policy_path(policy.identifier_type, policy.location.as_ref());
        let policy = policy.clone();

        lock::update(path, move |doc: &mut Option<AutoGenerationPolicy>| {
            if let Some(existing) = doc.as_ref().filter(|p| p.id != policy.id) {
                return Err(StorageError::Conflict(format!(
                    "policy {} for type {} already exists at this scope",
                    existing.id, policy.identifier_type
                )));
            }
            *doc = Some(policy);
            Ok(((), true))
        })
        .await
    }

    async fn find_policy(
        &self,
        identifier_type: IdentifierTypeId,
        location: Option<&LocationId>,
    ) -> StorageResult<Option<AutoGenerationPolicy>> {
        lock::read(self.policy_path(identifier_type, location)).await
    }

    async fn list_policies(&self) -> StorageResult<Vec<AutoGenerationPolicy>> {
        let mut policies: Vec<AutoGenerationPolicy> = self.list_configs(POLICIES).await?;
        policies.sort_by_key(|p| p.updated_at);
        Ok(policies)
    }

    async fn delete_policy(&self, id: PolicyId) -> StorageResult<bool> {
        let policies: Vec<AutoGenerationPolicy> = self.list_configs(POLICIES).await?;
        let Some(policy) = policies.into_iter().find(|p| p.id == id) else {
            return Ok(false);
        };

        let path = self.policy_path(policy.identifier_type, policy.location.as_ref());
        lock::update(path, move |doc: &mut Option<AutoGenerationPolicy>| {
            if doc.as_ref().is_some_and(|p| p.id == id) {
                *doc = None;
                return Ok((true, true));
            }
            Ok((false, false))
        })
        .await
    }
}
