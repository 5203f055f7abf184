//! Domain models for patient identifier generation.
//!
//! Identifier types, sources, auto-generation policies, pool and sequence
//! state, and the API contracts built on them.

pub mod alphabet;
pub mod dto;
pub mod format;
pub mod generated;
pub mod identifier_type;
pub mod ids;
pub mod policy;
pub mod pool;
pub mod sequence;
pub mod source;

pub use alphabet::{Alphabet, AlphabetError};
pub use dto::{
    ApiResponse, GenerateRequest, GenerateResponse, HealthResponse, ListPoliciesQuery,
    PoolStatusResponse, PoolUploadRequest, PoolUploadResponse, ReadyComponents, ReadyResponse,
    ReservationResponse, ValidateRequest, ValidateResponse,
};
pub use format::{EncodeError, SequenceFormat};
pub use generated::GeneratedIdentifier;
pub use identifier_type::{
    CheckDigitAlgorithm, IdentifierType, LocationBehavior, NewIdentifierType, UniquenessBehavior,
};
pub use ids::{IdentifierTypeId, LocationId, PolicyId, SourceId};
pub use policy::{AutoGenerationPolicy, EffectivePolicy, PolicyScope, PolicyUpsert};
pub use pool::{
    PoolCounts, PoolEntry, PoolEntryState, PoolState, ReservationOutcome, ReservationToken,
    TokenParseError,
};
pub use sequence::{SequenceRange, SequenceState};
pub use source::{
    AllocationOrder, IdentifierSource, NewIdentifierSource, PoolSource, RemoteSource, SourceKind,
    SequentialSource,
};
