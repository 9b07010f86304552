pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod liveness;
pub mod security;
pub mod store;
pub mod ws;

pub use app::{build_router, AppState, HealthResponse};
pub use config::GatewayConfig;
pub use error::{ApiError, ErrorResponse};
pub use liveness::{spawn_sweeper, LivenessTracker, Peer, SweepReport};
pub use store::{MemorySessionStore, SessionStore, SessionTier, StoreError};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Undecryptable.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::StoreFull.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_undecryptable_message_is_generic() {
        assert_eq!(
            ApiError::Undecryptable.to_string(),
            "could not decrypt session"
        );
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            ApiError::from(StoreError::CapacityReached(1)),
            ApiError::StoreFull
        ));
        assert!(matches!(
            ApiError::from(StoreError::Unavailable),
            ApiError::Internal
        ));
    }
}
