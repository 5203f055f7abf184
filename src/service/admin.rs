//! Administration of identifier types, sources and policies.
//!
//! Every write is validated here before it reaches storage, so the engine
//! can treat stored configuration as well formed.

use std::sync::Arc;

use crate::domain::{
    AutoGenerationPolicy, IdentifierSource, IdentifierType, IdentifierTypeId, NewIdentifierSource,
    NewIdentifierType, PolicyId, PolicyUpsert, PoolStatusResponse, SourceId, SourceKind,
};
use crate::error::{IdGenError, Result, StorageError};
use crate::service::check_digit;
use crate::service::pool::PoolManager;
use crate::service::validator;
use crate::storage::Storage;

/// Configuration operations used by the admin API.
pub struct AdminService {
    storage: Arc<dyn Storage>,
    pools: Arc<PoolManager>,
}

impl AdminService {
    /// Create an admin service.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, pools: Arc<PoolManager>) -> Self {
        Self { storage, pools }
    }

    // ===== Identifier types =====

    /// Create an identifier type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for bad fields or a regex that does not
    /// compile, and `ConfigExists` if an active type has the same name.
    pub async fn create_identifier_type(&self, request: NewIdentifierType) -> Result<IdentifierType> {
        request.validate().map_err(IdGenError::InvalidConfig)?;
        if let Some(pattern) = request.format_regex.as_deref() {
            validator::compile_format(pattern)?;
        }

        let id_type = request.into_identifier_type();
        self.storage
            .create_identifier_type(&id_type)
            .await
            .map_err(|e| match e {
                StorageError::Conflict(_) => {
                    IdGenError::ConfigExists(format!("identifier type '{}'", id_type.name))
                }
                other => other.into(),
            })?;

        tracing::info!(identifier_type = %id_type.id, name = %id_type.name, "Identifier type created");
        Ok(id_type)
    }

    /// Get an identifier type.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the type does not exist.
    pub async fn get_identifier_type(&self, id: IdentifierTypeId) -> Result<IdentifierType> {
        self.storage
            .get_identifier_type(id)
            .await?
            .ok_or_else(|| IdGenError::NotFound(format!("identifier type {id}")))
    }

    /// List all identifier types, retired ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn list_identifier_types(&self) -> Result<Vec<IdentifierType>> {
        Ok(self.storage.list_identifier_types().await?)
    }

    /// Retire an identifier type. Retiring twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the type does not exist.
    pub async fn retire_identifier_type(&self, id: IdentifierTypeId) -> Result<IdentifierType> {
        let mut id_type = self.get_identifier_type(id).await?;
        if !id_type.retired {
            id_type.retired = true;
            self.storage.save_identifier_type(&id_type).await?;
            tracing::info!(identifier_type = %id, "Identifier type retired");
        }
        Ok(id_type)
    }

    // ===== Sources =====

    /// Create an identifier source.
    ///
    /// Sequential sources get their durable counter at `first_identifier_base`;
    /// pool sources are loaded with the supplied identifiers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for bad fields, `NotFound` for an unknown type,
    /// and `Retired` for a retired type.
    pub async fn create_identifier_source(
        &self,
        request: NewIdentifierSource,
    ) -> Result<IdentifierSource> {
        request.validate().map_err(IdGenError::InvalidConfig)?;

        let id_type = self.get_identifier_type(request.identifier_type).await?;
        if id_type.retired {
            return Err(IdGenError::Retired(format!(
                "identifier type '{}'",
                id_type.name
            )));
        }

        let (source, identifiers) = request.into_parts();
        ensure_check_digit_covers(&id_type, &source)?;

        // The counter exists before the source becomes visible to policies.
        if let SourceKind::Sequential(sequential) = &source.kind {
            self.storage
                .initialize(source.id, sequential.first_identifier_base)
                .await?;
        }
        self.storage.save_source(&source).await?;

        if !identifiers.is_empty() {
            let added = self.pools.add(source.id, &identifiers).await?;
            tracing::debug!(source_id = %source.id, added, "Pool loaded");
        }

        tracing::info!(
            source_id = %source.id,
            identifier_type = %source.identifier_type,
            kind = source.kind.label(),
            "Identifier source created"
        );
        Ok(source)
    }

    /// Get a source.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the source does not exist.
    pub async fn get_identifier_source(&self, id: SourceId) -> Result<IdentifierSource> {
        self.storage
            .get_source(id)
            .await?
            .ok_or_else(|| IdGenError::NotFound(format!("source {id}")))
    }

    /// List all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn list_identifier_sources(&self) -> Result<Vec<IdentifierSource>> {
        Ok(self.storage.list_sources().await?)
    }

    /// Retire a source. Retiring twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the source does not exist.
    pub async fn retire_identifier_source(&self, id: SourceId) -> Result<IdentifierSource> {
        let mut source = self.get_identifier_source(id).await?;
        if !source.retired {
            source.retired = true;
            self.storage.save_source(&source).await?;
            tracing::info!(source_id = %id, "Identifier source retired");
        }
        Ok(source)
    }

    /// Load more identifiers into a pool source.
    ///
    /// Returns the number of identifiers that were new.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown source, `InvalidConfig` if it is not
    /// a pool, and `BadRequest` for blank values.
    pub async fn add_pool_identifiers(&self, id: SourceId, identifiers: &[String]) -> Result<usize> {
        self.pool_source(id).await?;
        if identifiers.is_empty() {
            return Err(IdGenError::BadRequest("no identifiers supplied".to_string()));
        }
        if identifiers.iter().any(|v| v.trim().is_empty()) {
            return Err(IdGenError::BadRequest(
                "pool identifiers cannot be blank".to_string(),
            ));
        }

        let added = self.pools.add(id, identifiers).await?;
        tracing::info!(source_id = %id, added, supplied = identifiers.len(), "Pool identifiers added");
        Ok(added)
    }

    /// Entry counts of a pool source.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown source and `InvalidConfig` if it is
    /// not a pool.
    pub async fn pool_status(&self, id: SourceId) -> Result<PoolStatusResponse> {
        self.pool_source(id).await?;
        Ok(PoolStatusResponse {
            source: id,
            counts: self.pools.status(id).await?,
        })
    }

    async fn pool_source(&self, id: SourceId) -> Result<IdentifierSource> {
        let source = self.get_identifier_source(id).await?;
        if !matches!(source.kind, SourceKind::Pool(_)) {
            return Err(IdGenError::InvalidConfig(format!(
                "source '{}' is not a pool source",
                source.name
            )));
        }
        Ok(source)
    }

    // ===== Policies =====

    /// Create or replace the policy for an (identifier type, location) pair.
    ///
    /// An existing policy for the pair keeps its id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for bad flags or a source of another type,
    /// `NotFound` for an unknown type or source, `Retired` for a retired
    /// source, and `ConfigExists` if a concurrent write claimed the pair.
    pub async fn upsert_policy(&self, request: PolicyUpsert) -> Result<AutoGenerationPolicy> {
        request.validate().map_err(IdGenError::InvalidConfig)?;

        let id_type = self.get_identifier_type(request.identifier_type).await?;
        let source = self.get_identifier_source(request.source).await?;
        if source.retired {
            return Err(IdGenError::Retired(format!("source '{}'", source.name)));
        }
        if source.identifier_type != id_type.id {
            return Err(IdGenError::InvalidConfig(format!(
                "source '{}' does not serve identifier type '{}'",
                source.name, id_type.name
            )));
        }
        ensure_check_digit_covers(&id_type, &source)?;

        let id = self
            .storage
            .find_policy(request.identifier_type, request.location.as_ref())
            .await?
            .map_or_else(PolicyId::new, |existing| existing.id);

        let policy = request.into_policy(id);
        self.storage.save_policy(&policy).await.map_err(|e| match e {
            StorageError::Conflict(msg) => IdGenError::ConfigExists(msg),
            other => other.into(),
        })?;

        tracing::info!(
            policy_id = %policy.id,
            identifier_type = %policy.identifier_type,
            location = ?policy.location,
            source_id = %policy.source,
            automatic = policy.automatic_generation,
            "Policy saved"
        );
        Ok(policy)
    }

    /// Delete a policy.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the policy does not exist.
    pub async fn delete_policy(&self, id: PolicyId) -> Result<()> {
        if !self.storage.delete_policy(id).await? {
            return Err(IdGenError::NotFound(format!("policy {id}")));
        }
        tracing::info!(policy_id = %id, "Policy deleted");
        Ok(())
    }

    /// List policies, optionally for one identifier type.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub async fn list_policies(
        &self,
        identifier_type: Option<IdentifierTypeId>,
    ) -> Result<Vec<AutoGenerationPolicy>> {
        let policies = self.storage.list_policies().await?;
        Ok(match identifier_type {
            Some(t) => policies
                .into_iter()
                .filter(|p| p.identifier_type == t)
                .collect(),
            None => policies,
        })
    }
}

/// Reject a sequential source that emits symbols the type's check digit cannot weigh.
///
/// Pool and remote values are only known at issue time and are checked there.
fn ensure_check_digit_covers(id_type: &IdentifierType, source: &IdentifierSource) -> Result<()> {
    let SourceKind::Sequential(sequential) = &source.kind else {
        return Ok(());
    };
    let Some(strategy) = check_digit::strategy(&id_type.check_digit) else {
        return Ok(());
    };

    let alphabet = &sequential.base_character_set;
    let unsupported = sequential
        .prefix
        .chars()
        .chain(sequential.suffix.chars())
        .chain((0..alphabet.base()).map(|digit| alphabet.symbol(digit)))
        .find(|symbol| strategy.compute(&symbol.to_string()).is_err());

    match unsupported {
        Some(symbol) => Err(IdGenError::InvalidConfig(format!(
            "source '{}' emits '{symbol}', which the check digit of identifier type '{}' cannot weigh",
            source.name, id_type.name
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use crate::domain::{Alphabet, CheckDigitAlgorithm, LocationId, PoolSource, SequentialSource};
    use crate::storage::{ConfigStorage, MemoryStorage, SequenceStorage};

    fn admin() -> (AdminService, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let dyn_storage: Arc<dyn Storage> = storage.clone();
        let pools = Arc::new(PoolManager::new(
            Arc::clone(&dyn_storage),
            Duration::from_secs(60),
        ));
        (AdminService::new(dyn_storage, pools), storage)
    }

    fn new_type(name: &str) -> NewIdentifierType {
        NewIdentifierType {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn new_source(identifier_type: IdentifierTypeId, kind: SourceKind) -> NewIdentifierSource {
        NewIdentifierSource {
            name: "Main".to_string(),
            description: String::new(),
            identifier_type,
            identifiers: Vec::new(),
            kind,
        }
    }

    fn sequential(first: u64) -> SourceKind {
        SourceKind::Sequential(SequentialSource {
            prefix: "MRN-".to_string(),
            suffix: String::new(),
            base_character_set: Alphabet::decimal(),
            min_length: 8,
            max_length: 8,
            first_identifier_base: first,
            reserved_identifiers: BTreeSet::new(),
        })
    }

    #[tokio::test]
    async fn test_type_name_unique_among_active() {
        let (admin, _) = admin();
        let first = admin.create_identifier_type(new_type("MRN")).await.unwrap();

        assert!(matches!(
            admin.create_identifier_type(new_type("mrn")).await,
            Err(IdGenError::ConfigExists(_))
        ));

        admin.retire_identifier_type(first.id).await.unwrap();
        assert!(admin.create_identifier_type(new_type("MRN")).await.is_ok());
    }

    #[tokio::test]
    async fn test_type_regex_must_compile() {
        let (admin, _) = admin();
        let mut request = new_type("MRN");
        request.format_regex = Some("MRN-(\\d+".to_string());
        assert!(matches!(
            admin.create_identifier_type(request).await,
            Err(IdGenError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_sequential_source_initializes_counter() {
        let (admin, storage) = admin();
        let id_type = admin.create_identifier_type(new_type("MRN")).await.unwrap();
        let source = admin
            .create_identifier_source(new_source(id_type.id, sequential(42)))
            .await
            .unwrap();

        let state = storage.load(source.id).await.unwrap().unwrap();
        assert_eq!(state.next_value, 42);
    }

    #[tokio::test]
    async fn test_source_rejects_bad_lengths_and_retired_type() {
        let (admin, _) = admin();
        let id_type = admin.create_identifier_type(new_type("MRN")).await.unwrap();

        let SourceKind::Sequential(mut bad) = sequential(1) else {
            unreachable!()
        };
        bad.min_length = 9;
        assert!(matches!(
            admin
                .create_identifier_source(new_source(id_type.id, SourceKind::Sequential(bad)))
                .await,
            Err(IdGenError::InvalidConfig(_))
        ));

        assert!(matches!(
            admin
                .create_identifier_source(new_source(IdentifierTypeId::new(), sequential(1)))
                .await,
            Err(IdGenError::NotFound(_))
        ));

        admin.retire_identifier_type(id_type.id).await.unwrap();
        assert!(matches!(
            admin
                .create_identifier_source(new_source(id_type.id, sequential(1)))
                .await,
            Err(IdGenError::Retired(_))
        ));
    }

    #[tokio::test]
    async fn test_pool_source_loading() {
        let (admin, _) = admin();
        let id_type = admin.create_identifier_type(new_type("VIP")).await.unwrap();
        let mut request = new_source(id_type.id, SourceKind::Pool(PoolSource::default()));
        request.identifiers = vec!["VIP001".to_string(), "VIP002".to_string()];
        let source = admin.create_identifier_source(request).await.unwrap();

        let added = admin
            .add_pool_identifiers(source.id, &["VIP002".to_string(), "VIP003".to_string()])
            .await
            .unwrap();
        assert_eq!(added, 1);

        let status = admin.pool_status(source.id).await.unwrap();
        assert_eq!(status.counts.available, 3);
        assert_eq!(status.counts.total(), 3);

        let seq = admin
            .create_identifier_source(new_source(id_type.id, sequential(1)))
            .await
            .unwrap();
        assert!(matches!(
            admin.pool_status(seq.id).await,
            Err(IdGenError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_policy_replaces_pair() {
        let (admin, _) = admin();
        let id_type = admin.create_identifier_type(new_type("MRN")).await.unwrap();
        let source = admin
            .create_identifier_source(new_source(id_type.id, sequential(1)))
            .await
            .unwrap();

        let upsert = |automatic: bool| PolicyUpsert {
            identifier_type: id_type.id,
            location: Some(LocationId::new("ward-7")),
            source: source.id,
            automatic_generation: automatic,
            manual_entry_allowed: true,
        };

        let first = admin.upsert_policy(upsert(true)).await.unwrap();
        let second = admin.upsert_policy(upsert(false)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(!second.automatic_generation);

        let policies = admin.list_policies(Some(id_type.id)).await.unwrap();
        assert_eq!(policies.len(), 1);

        admin.delete_policy(first.id).await.unwrap();
        assert!(matches!(
            admin.delete_policy(first.id).await,
            Err(IdGenError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_policy_source_must_serve_type() {
        let (admin, _) = admin();
        let mrn = admin.create_identifier_type(new_type("MRN")).await.unwrap();
        let other = admin.create_identifier_type(new_type("Old MRN")).await.unwrap();
        let source = admin
            .create_identifier_source(new_source(other.id, sequential(1)))
            .await
            .unwrap();

        let result = admin
            .upsert_policy(PolicyUpsert {
                identifier_type: mrn.id,
                location: None,
                source: source.id,
                automatic_generation: true,
                manual_entry_allowed: false,
            })
            .await;
        assert!(matches!(result, Err(IdGenError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_check_digit_must_cover_source_symbols() {
        let (admin, storage) = admin();
        let mut request = new_type("Luhn MRN");
        request.check_digit = CheckDigitAlgorithm::Mod10Luhn;
        let luhn = admin.create_identifier_type(request).await.unwrap();

        // "MRN-" cannot be weighed by decimal Luhn.
        assert!(matches!(
            admin
                .create_identifier_source(new_source(luhn.id, sequential(1)))
                .await,
            Err(IdGenError::InvalidConfig(_))
        ));

        let SourceKind::Sequential(mut digits) = sequential(1) else {
            unreachable!()
        };
        digits.prefix = "9".to_string();
        assert!(
            admin
                .create_identifier_source(new_source(luhn.id, SourceKind::Sequential(digits)))
                .await
                .is_ok()
        );

        // A source written before the type gained its check digit is caught at policy time.
        let plain = admin.create_identifier_type(new_type("MRN")).await.unwrap();
        let source = admin
            .create_identifier_source(new_source(plain.id, sequential(1)))
            .await
            .unwrap();
        let mut stricter = storage.get_identifier_type(plain.id).await.unwrap().unwrap();
        stricter.check_digit = CheckDigitAlgorithm::Mod10Luhn;
        storage.save_identifier_type(&stricter).await.unwrap();

        let result = admin
            .upsert_policy(PolicyUpsert {
                identifier_type: plain.id,
                location: None,
                source: source.id,
                automatic_generation: true,
                manual_entry_allowed: false,
            })
            .await;
        assert!(matches!(result, Err(IdGenError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_concurrent_type_creation_claims_name_once() {
        let (admin, _) = admin();
        let admin = Arc::new(admin);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let admin = Arc::clone(&admin);
                let name = if i % 2 == 0 { "MRN" } else { "mrn" };
                tokio::spawn(async move { admin.create_identifier_type(new_type(name)).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(IdGenError::ConfigExists(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(admin.list_identifier_types().await.unwrap().len(), 1);
    }
}
