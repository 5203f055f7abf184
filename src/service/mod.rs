//! Service layer module.
//!
//! The generation engine (encoder, check digits, sequence allocation, pools,
//! remote sources, policy resolution) and the administration service.

pub mod admin;
pub mod breaker;
pub mod cache;
pub mod check_digit;
pub mod context;
pub mod encoder;
pub mod generation;
pub mod policy;
pub mod pool;
pub mod remote;
pub mod retry;
pub mod sequence;
pub mod validator;

pub use admin::AdminService;
pub use context::CallContext;
pub use generation::GenerationService;
pub use policy::PolicyResolver;
pub use pool::{PoolManager, PoolSweeper};
pub use remote::{HttpRemoteProvider, RemoteIdentifierProvider, RemoteSourceClient};
pub use sequence::SequenceAllocator;
pub use validator::Validator;
