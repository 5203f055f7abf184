//! Error code constants.
//!
//! Error codes are organized by category:
//! - 1xxx: Configuration errors (rejected at write time, or config bugs found at run time)
//! - 2xxx: Capacity errors (need admin action)
//! - 3xxx: Transient errors (caller may try again)
//! - 4xxx: Request errors
//! - 5xxx: Internal/System errors

/// Error code type with semantic categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(i32);

impl ErrorCode {
    // ===== Configuration Errors (1xxx) =====

    /// Invalid configuration parameters.
    pub const INVALID_CONFIG: Self = Self(1001);

    /// Configuration already exists.
    pub const CONFIG_EXISTS: Self = Self(1002);

    /// No auto-generation policy for the type and location.
    pub const NO_POLICY_CONFIGURED: Self = Self(1003);

    /// Referenced type or source is retired.
    pub const RETIRED: Self = Self(1004);

    /// A generator produced a value its own type rejects.
    pub const GENERATED_VALUE_INVALID: Self = Self(1005);

    // ===== Capacity Errors (2xxx) =====

    /// Sequential space exhausted.
    pub const CAPACITY_EXHAUSTED: Self = Self(2001);

    /// Pool has no available identifiers.
    pub const POOL_EXHAUSTED: Self = Self(2002);

    // ===== Transient Errors (3xxx) =====

    /// Counter contention did not resolve within the retry budget.
    pub const ALLOCATION_TIMEOUT: Self = Self(3001);

    /// Remote provider unreachable or circuit open.
    pub const REMOTE_UNAVAILABLE: Self = Self(3002);

    /// Cancelled or deadline exceeded.
    pub const CANCELLED: Self = Self(3003);

    // ===== Request Errors (4xxx) =====

    /// Bad request / invalid parameters.
    pub const BAD_REQUEST: Self = Self(4001);

    /// Resource not found.
    pub const NOT_FOUND: Self = Self(4002);

    /// Automatic generation is disabled; a manual value is expected.
    pub const MANUAL_ENTRY_REQUIRED: Self = Self(4003);

    /// The identifier type requires a location.
    pub const LOCATION_REQUIRED: Self = Self(4004);

    /// Unknown, expired or already resolved reservation.
    pub const INVALID_RESERVATION: Self = Self(4005);

    // ===== Internal/System Errors (5xxx) =====

    /// Storage backend error.
    pub const STORAGE_ERROR: Self = Self(5001);

    /// Internal server error.
    pub const INTERNAL_ERROR: Self = Self(5002);

    /// Service unavailable.
    pub const SERVICE_UNAVAILABLE: Self = Self(5003);

    /// Get the error code as an i32.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Get the category of this error code.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.0 {
            1000..=1999 => ErrorCategory::Configuration,
            2000..=2999 => ErrorCategory::Capacity,
            3000..=3999 => ErrorCategory::Transient,
            4000..=4999 => ErrorCategory::Request,
            5000..=5999 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

/// Error category based on error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors (1xxx); surfaced as an actionable admin message.
    Configuration,
    /// Capacity errors (2xxx); surfaced as an actionable admin message.
    Capacity,
    /// Transient errors (3xxx); surfaced as "try again".
    Transient,
    /// Request errors (4xxx).
    Request,
    /// Internal/system errors (5xxx).
    Internal,
    /// Unknown category.
    Unknown,
}

impl ErrorCategory {
    /// Whether the failure needs an administrator to change configuration.
    #[must_use]
    pub const fn needs_admin(self) -> bool {
        matches!(self, Self::Configuration | Self::Capacity)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Capacity => write!(f, "capacity"),
            Self::Transient => write!(f, "transient"),
            Self::Request => write!(f, "request"),
            Self::Internal => write!(f, "internal"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
