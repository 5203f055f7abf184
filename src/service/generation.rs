//! Identifier generation façade.
//!
//! One call walks `policy selected -> source dispatched -> allocated ->
//! validated`. Validation failures are configuration bugs: the value is
//! discarded (pool entries are released, counter advances are kept as gaps)
//! and the error is never retried.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    GeneratedIdentifier, IdentifierSource, IdentifierType, IdentifierTypeId, LocationBehavior,
    LocationId, ReservationToken, SourceId, SourceKind, ValidateResponse,
};
use crate::error::{IdGenError, Result};
use crate::service::check_digit;
use crate::service::context::CallContext;
use crate::service::policy::PolicyResolver;
use crate::service::pool::PoolManager;
use crate::service::remote::RemoteSourceClient;
use crate::service::sequence::SequenceAllocator;
use crate::service::validator::{ValidationError, Validator};
use crate::storage::Storage;

/// Value produced by a source before check digit and validation.
struct Allocated {
    body: String,
    sequence_number: Option<u64>,
    reservation: Option<ReservationToken>,
}

/// Generates identifiers for (type, location) pairs.
pub struct GenerationService {
    storage: Arc<dyn Storage>,
    resolver: PolicyResolver,
    sequences: SequenceAllocator,
    pools: Arc<PoolManager>,
    remote: RemoteSourceClient,
    validator: Validator,
}

impl GenerationService {
    /// Create a generation service over the given strategy components.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        sequences: SequenceAllocator,
        pools: Arc<PoolManager>,
        remote: RemoteSourceClient,
    ) -> Self {
        Self {
            resolver: PolicyResolver::new(Arc::clone(&storage)),
            storage,
            sequences,
            pools,
            remote,
            validator: Validator::new(),
        }
    }

    /// Generate an identifier of `identifier_type` for `location`.
    ///
    /// For pool sources the result carries a reservation that must be
    /// committed or released.
    ///
    /// # Errors
    ///
    /// Returns `ManualEntryRequired` when the resolved policy disables
    /// automatic generation, `NoPolicyConfigured`, `LocationRequired` or
    /// `Retired` for configuration problems, the strategy's own failure
    /// (`CapacityExhausted`, `PoolExhausted`, `AllocationTimeout`,
    /// `RemoteUnavailable`, `Cancelled`), and `GeneratedValueInvalid` when the
    /// value fails its type's validator.
    pub async fn generate(
        &self,
        ctx: &CallContext,
        identifier_type: IdentifierTypeId,
        location: Option<&LocationId>,
    ) -> Result<GeneratedIdentifier> {
        let result = self.try_generate(ctx, identifier_type, location).await;

        match &result {
            Ok(generated) => {
                tracing::info!(
                    identifier_type = %identifier_type,
                    source_id = %generated.source,
                    value = %generated.value,
                    "Identifier generated"
                );
            }
            Err(e) => {
                metrics::counter!("idgen_generation_failures_total", "reason" => e.reason())
                    .increment(1);
                tracing::debug!(
                    identifier_type = %identifier_type,
                    location = ?location,
                    error = %e,
                    "Identifier generation failed"
                );
            }
        }

        result
    }

    async fn try_generate(
        &self,
        ctx: &CallContext,
        identifier_type: IdentifierTypeId,
        location: Option<&LocationId>,
    ) -> Result<GeneratedIdentifier> {
        ctx.check()?;

        let id_type = self.load_type(identifier_type).await?;
        if id_type.location_behavior == LocationBehavior::Required && location.is_none() {
            return Err(IdGenError::LocationRequired(identifier_type));
        }

        let effective = self.resolver.resolve(identifier_type, location).await?;
        tracing::debug!(
            identifier_type = %identifier_type,
            location = ?location,
            scope = ?effective.scope,
            source_id = %effective.source(),
            "Policy selected"
        );
        if !effective.automatic_generation() {
            return Err(IdGenError::ManualEntryRequired(identifier_type));
        }

        let source = self.load_source(&id_type, effective.source()).await?;
        let kind = source.kind.label();
        tracing::debug!(source_id = %source.id, kind, "Source dispatched");

        let allocated = self.allocate(ctx, &id_type, &source).await?;
        tracing::debug!(source_id = %source.id, body = %allocated.body, "Allocated");

        let value = match self.finish(&id_type, &allocated.body) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    identifier_type = %identifier_type,
                    source_id = %source.id,
                    body = %allocated.body,
                    error = %e,
                    "Generated value rejected by its own identifier type"
                );
                if let Some(token) = allocated.reservation {
                    if let Err(release_err) = self.pools.release(token).await {
                        tracing::warn!(token = %token, error = %release_err, "Failed to release rejected pool value");
                    }
                }
                return Err(e);
            }
        };

        metrics::counter!("idgen_generated_total", "kind" => kind).increment(1);

        Ok(GeneratedIdentifier {
            value,
            source: source.id,
            sequence_number: allocated.sequence_number,
            issued_at: Utc::now(),
            reservation: allocated.reservation,
        })
    }

    async fn allocate(
        &self,
        ctx: &CallContext,
        id_type: &IdentifierType,
        source: &IdentifierSource,
    ) -> Result<Allocated> {
        match &source.kind {
            SourceKind::Sequential(sequential) => {
                let (sequence, body) = self
                    .sequences
                    .next_identifier(ctx, source.id, sequential)
                    .await?;
                Ok(Allocated {
                    body,
                    sequence_number: Some(sequence),
                    reservation: None,
                })
            }
            SourceKind::Pool(pool) => {
                let (body, token) = self.pools.reserve(ctx, source.id, pool.order).await?;
                Ok(Allocated {
                    body,
                    sequence_number: None,
                    reservation: Some(token),
                })
            }
            SourceKind::Remote(remote) => {
                if remote.skip_automatic_assignment {
                    return Err(IdGenError::ManualEntryRequired(id_type.id));
                }
                let body = self.remote.next_value(ctx, source.id, remote).await?;
                Ok(Allocated {
                    body,
                    sequence_number: None,
                    reservation: None,
                })
            }
        }
    }

    /// Append the check character and validate the result.
    fn finish(&self, id_type: &IdentifierType, body: &str) -> Result<String> {
        let invalid = |reason: String| IdGenError::GeneratedValueInvalid {
            value: body.to_string(),
            reason,
        };

        let mut value = body.to_string();
        if let Some(check) =
            check_digit::compute(body, &id_type.check_digit).map_err(|e| invalid(e.to_string()))?
        {
            value.push(check);
        }

        self.validator
            .validate(id_type, &value)
            .map_err(|e| IdGenError::GeneratedValueInvalid {
                value: value.clone(),
                reason: e.to_string(),
            })?;

        Ok(value)
    }

    /// Commit a pool reservation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReservation` if the token is unknown, expired or resolved.
    pub async fn commit(&self, token: ReservationToken) -> Result<String> {
        self.pools.commit(token).await
    }

    /// Release a pool reservation back to the pool.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReservation` if the token is unknown or already resolved.
    pub async fn release(&self, token: ReservationToken) -> Result<String> {
        self.pools.release(token).await
    }

    /// Check a manually entered identifier against its type.
    ///
    /// A value that fails format or check digit rules yields `valid: false`
    /// rather than an error.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown type and `InvalidConfig` if the
    /// type's format regex is broken.
    pub async fn validate_identifier(
        &self,
        identifier_type: IdentifierTypeId,
        value: &str,
    ) -> Result<ValidateResponse> {
        let id_type = self
            .storage
            .get_identifier_type(identifier_type)
            .await?
            .ok_or_else(|| IdGenError::NotFound(format!("identifier type {identifier_type}")))?;

        match self.validator.validate(&id_type, value) {
            Ok(()) => Ok(ValidateResponse {
                valid: true,
                reason: None,
            }),
            Err(e @ ValidationError::InvalidPattern { .. }) => Err(e.into()),
            Err(e) => Ok(ValidateResponse {
                valid: false,
                reason: Some(e.to_string()),
            }),
        }
    }

    async fn load_type(&self, id: IdentifierTypeId) -> Result<IdentifierType> {
        let id_type = self
            .storage
            .get_identifier_type(id)
            .await?
            .ok_or_else(|| IdGenError::NotFound(format!("identifier type {id}")))?;
        if id_type.retired {
            return Err(IdGenError::Retired(format!("identifier type '{}'", id_type.name)));
        }
        Ok(id_type)
    }

    async fn load_source(
        &self,
        id_type: &IdentifierType,
        source_id: SourceId,
    ) -> Result<IdentifierSource> {
        let source = self.storage.get_source(source_id).await?.ok_or_else(|| {
            IdGenError::InvalidConfig(format!("policy references missing source {source_id}"))
        })?;
        if source.retired {
            self.sequences.evict(source.id);
            return Err(IdGenError::Retired(format!("source '{}'", source.name)));
        }
        if source.identifier_type != id_type.id {
            return Err(IdGenError::InvalidConfig(format!(
                "source '{}' does not serve identifier type '{}'",
                source.name, id_type.name
            )));
        }
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::RemoteConfig;
    use crate::domain::{
        Alphabet, CheckDigitAlgorithm, NewIdentifierType, PolicyId, PolicyUpsert, PoolSource,
        RemoteSource, SequentialSource,
    };
    use crate::service::remote::{RemoteError, RemoteIdentifierProvider};
    use crate::service::retry::RetryPolicy;
    use crate::storage::{ConfigStorage, MemoryStorage, PoolStorage, SequenceStorage};

    struct FixedProvider(Vec<String>);

    #[async_trait]
    impl RemoteIdentifierProvider for FixedProvider {
        async fn fetch(&self, _: &RemoteSource, _: u32) -> std::result::Result<Vec<String>, RemoteError> {
            Ok(self.0.clone())
        }
    }

    struct Harness {
        storage: Arc<MemoryStorage>,
        service: GenerationService,
    }

    fn harness(remote_values: &[&str]) -> Harness {
        harness_with_block(remote_values, 1)
    }

    fn harness_with_block(remote_values: &[&str], block_size: u32) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let dyn_storage: Arc<dyn Storage> = storage.clone();
        let provider = Arc::new(FixedProvider(
            remote_values.iter().map(|v| (*v).to_string()).collect(),
        ));
        let service = GenerationService::new(
            Arc::clone(&dyn_storage),
            SequenceAllocator::new(
                Arc::clone(&dyn_storage),
                RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(5)),
                block_size,
            ),
            Arc::new(PoolManager::new(
                Arc::clone(&dyn_storage),
                Duration::from_secs(60),
            )),
            RemoteSourceClient::new(provider, &RemoteConfig::default()),
        );
        Harness { storage, service }
    }

    impl Harness {
        async fn add_type(&self, new_type: NewIdentifierType) -> IdentifierType {
            let id_type = new_type.into_identifier_type();
            self.storage.save_identifier_type(&id_type).await.unwrap();
            id_type
        }

        async fn add_source(&self, id_type: &IdentifierType, kind: SourceKind) -> SourceId {
            let source = IdentifierSource {
                id: SourceId::new(),
                name: format!("{} source", kind.label()),
                description: String::new(),
                identifier_type: id_type.id,
                retired: false,
                created_at: Utc::now(),
                kind,
            };
            if let SourceKind::Sequential(seq) = &source.kind {
                self.storage
                    .initialize(source.id, seq.first_identifier_base)
                    .await
                    .unwrap();
            }
            self.storage.save_source(&source).await.unwrap();
            source.id
        }

        async fn add_policy(
            &self,
            id_type: &IdentifierType,
            location: Option<&str>,
            source: SourceId,
            automatic: bool,
        ) {
            let policy = PolicyUpsert {
                identifier_type: id_type.id,
                location: location.map(LocationId::new),
                source,
                automatic_generation: automatic,
                manual_entry_allowed: true,
            }
            .into_policy(PolicyId::new());
            self.storage.save_policy(&policy).await.unwrap();
        }
    }

    fn mrn_type(regex: Option<&str>, check_digit: CheckDigitAlgorithm) -> NewIdentifierType {
        NewIdentifierType {
            name: "MRN".to_string(),
            format_regex: regex.map(str::to_string),
            check_digit,
            ..Default::default()
        }
    }

    fn sequential(prefix: &str, min: usize, max: usize, first: u64) -> SourceKind {
        SourceKind::Sequential(SequentialSource {
            prefix: prefix.to_string(),
            suffix: String::new(),
            base_character_set: Alphabet::decimal(),
            min_length: min,
            max_length: max,
            first_identifier_base: first,
            reserved_identifiers: BTreeSet::new(),
        })
    }

    #[tokio::test]
    async fn test_sequential_generation() {
        let h = harness(&[]);
        let id_type = h
            .add_type(mrn_type(Some(r"MRN-\d{4}"), CheckDigitAlgorithm::None))
            .await;
        let source = h.add_source(&id_type, sequential("MRN-", 8, 8, 1)).await;
        h.add_policy(&id_type, None, source, true).await;
        let ctx = CallContext::background();

        let first = h.service.generate(&ctx, id_type.id, None).await.unwrap();
        let second = h.service.generate(&ctx, id_type.id, None).await.unwrap();
        assert_eq!(first.value, "MRN-0001");
        assert_eq!(second.value, "MRN-0002");
        assert_eq!(first.sequence_number, Some(1));
        assert_eq!(first.source, source);
        assert!(!first.is_pending());
    }

    #[tokio::test]
    async fn test_check_digit_appended() {
        let h = harness(&[]);
        let id_type = h
            .add_type(mrn_type(Some(r"\d{11}"), CheckDigitAlgorithm::Mod10Luhn))
            .await;
        let source = h.add_source(&id_type, sequential("", 10, 10, 7_992_739_871)).await;
        h.add_policy(&id_type, None, source, true).await;

        let generated = h
            .service
            .generate(&CallContext::background(), id_type.id, None)
            .await
            .unwrap();
        assert_eq!(generated.value, "79927398713");
    }

    #[tokio::test]
    async fn test_location_override_requires_manual_entry() {
        let h = harness(&[]);
        let id_type = h.add_type(mrn_type(None, CheckDigitAlgorithm::None)).await;
        let source = h.add_source(&id_type, sequential("", 4, 6, 1)).await;
        h.add_policy(&id_type, None, source, true).await;
        h.add_policy(&id_type, Some("X"), source, false).await;
        let ctx = CallContext::background();

        let at_x = h
            .service
            .generate(&ctx, id_type.id, Some(&LocationId::new("X")))
            .await;
        assert!(matches!(at_x, Err(IdGenError::ManualEntryRequired(t)) if t == id_type.id));

        let at_y = h
            .service
            .generate(&ctx, id_type.id, Some(&LocationId::new("Y")))
            .await;
        assert!(at_y.is_ok());
    }

    #[tokio::test]
    async fn test_validation_failure_keeps_gap() {
        let h = harness(&[]);
        let id_type = h.add_type(mrn_type(Some("[A-Z]+"), CheckDigitAlgorithm::None)).await;
        let source = h.add_source(&id_type, sequential("", 4, 4, 1)).await;
        h.add_policy(&id_type, None, source, true).await;

        let result = h
            .service
            .generate(&CallContext::background(), id_type.id, None)
            .await;
        assert!(matches!(result, Err(IdGenError::GeneratedValueInvalid { ref value, .. }) if value == "0001"));

        // The counter advance is not rolled back.
        let state = h.storage.load(source).await.unwrap().unwrap();
        assert_eq!(state.next_value, 2);
    }

    #[tokio::test]
    async fn test_pool_generation_and_commit() {
        let h = harness(&[]);
        let id_type = h.add_type(mrn_type(Some("VIP\\d{3}"), CheckDigitAlgorithm::None)).await;
        let source = h
            .add_source(&id_type, SourceKind::Pool(PoolSource::default()))
            .await;
        h.storage
            .add_identifiers(source, &["VIP001".to_string(), "bad".to_string()])
            .await
            .unwrap();
        h.add_policy(&id_type, None, source, true).await;
        let ctx = CallContext::background();

        let generated = h.service.generate(&ctx, id_type.id, None).await.unwrap();
        assert_eq!(generated.value, "VIP001");
        let token = generated.reservation.unwrap();
        assert_eq!(h.service.commit(token).await.unwrap(), "VIP001");

        // The malformed entry is released, not consumed.
        let result = h.service.generate(&ctx, id_type.id, None).await;
        assert!(matches!(result, Err(IdGenError::GeneratedValueInvalid { .. })));
        let counts = h.storage.counts(source).await.unwrap();
        assert_eq!((counts.available, counts.reserved, counts.used), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_remote_generation_and_skip_flag() {
        let h = harness(&["R1", "R2"]);
        let id_type = h.add_type(mrn_type(None, CheckDigitAlgorithm::None)).await;
        let remote = RemoteSource {
            endpoint: "http://remote.invalid/ids".to_string(),
            username: None,
            password: None,
            batch_size: 2,
            skip_automatic_assignment: false,
        };
        let source = h
            .add_source(&id_type, SourceKind::Remote(remote.clone()))
            .await;
        h.add_policy(&id_type, None, source, true).await;
        let ctx = CallContext::background();

        let generated = h.service.generate(&ctx, id_type.id, None).await.unwrap();
        assert_eq!(generated.value, "R1");

        let other_type = h
            .add_type(NewIdentifierType {
                name: "Old MRN".to_string(),
                ..Default::default()
            })
            .await;
        let skipped = h
            .add_source(
                &other_type,
                SourceKind::Remote(RemoteSource {
                    skip_automatic_assignment: true,
                    ..remote
                }),
            )
            .await;
        h.add_policy(&other_type, None, skipped, true).await;
        let result = h.service.generate(&ctx, other_type.id, None).await;
        assert!(matches!(result, Err(IdGenError::ManualEntryRequired(_))));
    }

    #[tokio::test]
    async fn test_location_required_and_retired() {
        let h = harness(&[]);
        let mut new_type = mrn_type(None, CheckDigitAlgorithm::None);
        new_type.location_behavior = LocationBehavior::Required;
        let id_type = h.add_type(new_type).await;
        let source = h.add_source(&id_type, sequential("", 4, 4, 1)).await;
        h.add_policy(&id_type, None, source, true).await;
        let ctx = CallContext::background();

        let result = h.service.generate(&ctx, id_type.id, None).await;
        assert!(matches!(result, Err(IdGenError::LocationRequired(_))));

        let mut retired = id_type.clone();
        retired.retired = true;
        h.storage.save_identifier_type(&retired).await.unwrap();
        let result = h
            .service
            .generate(&ctx, id_type.id, Some(&LocationId::new("X")))
            .await;
        assert!(matches!(result, Err(IdGenError::Retired(_))));
    }

    #[tokio::test]
    async fn test_retired_source_drops_cached_block() {
        let h = harness_with_block(&[], 10);
        let id_type = h.add_type(mrn_type(None, CheckDigitAlgorithm::None)).await;
        let source_id = h.add_source(&id_type, sequential("", 4, 4, 1)).await;
        h.add_policy(&id_type, None, source_id, true).await;
        let ctx = CallContext::background();

        let first = h.service.generate(&ctx, id_type.id, None).await.unwrap();
        assert_eq!(first.value, "0001");

        let mut source = h.storage.get_source(source_id).await.unwrap().unwrap();
        source.retired = true;
        h.storage.save_source(&source).await.unwrap();
        let result = h.service.generate(&ctx, id_type.id, None).await;
        assert!(matches!(result, Err(IdGenError::Retired(_))));

        // Values 2..=10 left the counter with the block and are not reissued.
        source.retired = false;
        h.storage.save_source(&source).await.unwrap();
        let next = h.service.generate(&ctx, id_type.id, None).await.unwrap();
        assert_eq!(next.value, "0011");
    }

    #[tokio::test]
    async fn test_no_policy() {
        let h = harness(&[]);
        let id_type = h.add_type(mrn_type(None, CheckDigitAlgorithm::None)).await;
        let result = h
            .service
            .generate(&CallContext::background(), id_type.id, None)
            .await;
        assert!(matches!(result, Err(IdGenError::NoPolicyConfigured { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = harness(&[]);
        let ctx = CallContext::background();
        ctx.token().cancel();
        let result = h.service.generate(&ctx, IdentifierTypeId::new(), None).await;
        assert!(matches!(result, Err(IdGenError::Cancelled)));
    }

    #[tokio::test]
    async fn test_validate_identifier() {
        let h = harness(&[]);
        let id_type = h
            .add_type(mrn_type(Some(r"\d{11}"), CheckDigitAlgorithm::Mod10Luhn))
            .await;

        let ok = h
            .service
            .validate_identifier(id_type.id, "79927398713")
            .await
            .unwrap();
        assert!(ok.valid);

        let bad = h
            .service
            .validate_identifier(id_type.id, "79927398714")
            .await
            .unwrap();
        assert!(!bad.valid);
        assert!(bad.reason.is_some());

        assert!(matches!(
            h.service.validate_identifier(IdentifierTypeId::new(), "1").await,
            Err(IdGenError::NotFound(_))
        ));
    }
}
