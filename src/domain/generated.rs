//! Result of one successful generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ReservationToken, SourceId};

/// An identifier produced by the generation service.
///
/// For pool sources the value is only reserved: the caller must commit or
/// release `reservation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedIdentifier {
    /// Final identifier, including any check character.
    pub value: String,

    /// Source that issued the value.
    pub source: SourceId,

    /// Counter value for sequential sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,

    /// Issue time.
    pub issued_at: DateTime<Utc>,

    /// Pending reservation for pool sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationToken>,
}

impl GeneratedIdentifier {
    /// Whether the caller still has to commit or release this identifier.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.reservation.is_some()
    }
}
