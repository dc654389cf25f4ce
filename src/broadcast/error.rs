use thiserror::Error;

use crate::domain::access::AccessError;
use crate::domain::audience::AudienceError;
use crate::domain::delivery::DispatchError;
use crate::domain::engagement::EngagementError;
use crate::domain::schedule::ScheduleError;
use crate::domain::StoreError;

/// Caller-facing error taxonomy of the broadcast engine.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// Bad input or a status transition the state machine forbids; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not a business admin, or not the recipient of a tracked delivery
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A concurrent caller changed the campaign first
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A dependency timed out or is unavailable; the call may be retried
    #[error("Dependency unavailable: {0}")]
    Transient(String),

    #[error(transparent)]
    Store(StoreError),
}

impl BroadcastError {
    pub fn campaign_not_found(id: uuid::Uuid) -> Self {
        BroadcastError::NotFound(format!("campaign {}", id))
    }
}

impl From<StoreError> for BroadcastError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            BroadcastError::Transient(err.to_string())
        } else {
            BroadcastError::Store(err)
        }
    }
}

impl From<AudienceError> for BroadcastError {
    fn from(err: AudienceError) -> Self {
        match err {
            AudienceError::InvalidTargeting(msg) => BroadcastError::Validation(msg),
            other => BroadcastError::Transient(other.to_string()),
        }
    }
}

impl From<AccessError> for BroadcastError {
    fn from(err: AccessError) -> Self {
        BroadcastError::Transient(err.to_string())
    }
}

impl From<ScheduleError> for BroadcastError {
    fn from(err: ScheduleError) -> Self {
        BroadcastError::Transient(err.to_string())
    }
}

impl From<EngagementError> for BroadcastError {
    fn from(err: EngagementError) -> Self {
        match err {
            EngagementError::NotFound(id) => BroadcastError::NotFound(format!("delivery {}", id)),
            EngagementError::NotOwner(_) => BroadcastError::Unauthorized(err.to_string()),
            EngagementError::NotSent(_) => BroadcastError::Validation(err.to_string()),
            EngagementError::Store(e) => e.into(),
        }
    }
}

impl From<DispatchError> for BroadcastError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound(id) => BroadcastError::campaign_not_found(id),
            DispatchError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_audience_errors_map_to_taxonomy() {
        assert!(matches!(
            BroadcastError::from(AudienceError::InvalidTargeting("tag".into())),
            BroadcastError::Validation(_)
        ));
        assert!(matches!(
            BroadcastError::from(AudienceError::Timeout(Duration::from_secs(1))),
            BroadcastError::Transient(_)
        ));
    }

    #[test]
    fn test_store_errors_split_on_transience() {
        assert!(matches!(
            BroadcastError::from(StoreError::Unavailable("down".into())),
            BroadcastError::Transient(_)
        ));
        assert!(matches!(
            BroadcastError::from(StoreError::Corrupt("row".into())),
            BroadcastError::Store(_)
        ));
    }

    #[test]
    fn test_engagement_ownership_is_authorization() {
        let err = BroadcastError::from(EngagementError::NotOwner(uuid::Uuid::nil()));
        assert!(matches!(err, BroadcastError::Unauthorized(_)));
    }
}
