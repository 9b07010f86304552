//! Session API: seal payloads into a store tier and open them again.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tether_vault::{EncryptedBundle, Vault};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::store::SessionTier;

/// Payloads above this size are sealed on the blocking pool.
const INLINE_CRYPTO_LIMIT: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub payload: String,
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub id: String,
    pub tier: SessionTier,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionPayloadResponse {
    pub id: String,
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvictResponse {
    pub evicted: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TierQuery {
    #[serde(default)]
    pub tier: SessionTier,
}

pub fn is_valid_session_id(id: &str) -> bool {
    let len = id.len();
    (1..=128).contains(&len)
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn check_session_id(id: &str) -> Result<(), ApiError> {
    if is_valid_session_id(id) {
        Ok(())
    } else {
        Err(ApiError::BadRequest("Invalid session id".into()))
    }
}

async fn seal(vault: Arc<Vault>, payload: String) -> Result<EncryptedBundle, ApiError> {
    let sealed = if payload.len() > INLINE_CRYPTO_LIMIT {
        tokio::task::spawn_blocking(move || vault.encrypt(&payload))
            .await
            .map_err(|err| {
                error!("encryption task failed: {}", err);
                ApiError::Internal
            })?
    } else {
        vault.encrypt(&payload)
    };

    sealed.map_err(|err| {
        error!("session encryption failed: {}", err);
        ApiError::Internal
    })
}

async fn open(vault: Arc<Vault>, bundle: EncryptedBundle) -> Result<String, ApiError> {
    let opened = if bundle.content.len() > INLINE_CRYPTO_LIMIT * 2 {
        tokio::task::spawn_blocking(move || vault.decrypt(&bundle))
            .await
            .map_err(|err| {
                error!("decryption task failed: {}", err);
                ApiError::Internal
            })?
    } else {
        vault.decrypt(&bundle)
    };

    opened.map_err(|_| ApiError::Undecryptable)
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.payload.is_empty() {
        return Err(ApiError::BadRequest("payload must not be empty".into()));
    }

    let tier = if req.permanent {
        SessionTier::Permanent
    } else {
        SessionTier::Active
    };

    let bundle = seal(state.vault.clone(), req.payload).await?;
    let id = Uuid::new_v4().to_string();
    state.store(tier).put(&id, bundle)?;
    info!("stored {} session {}", tier.as_str(), id);

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse { id, tier }),
    ))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TierQuery>,
) -> Result<Json<SessionPayloadResponse>, ApiError> {
    check_session_id(&id)?;
    let bundle = state.store(query.tier).get(&id).ok_or(ApiError::NotFound)?;

    match open(state.vault.clone(), bundle).await {
        Ok(payload) => Ok(Json(SessionPayloadResponse { id, payload })),
        Err(err) => {
            debug!("session {} could not be decrypted", id);
            Err(err)
        }
    }
}

pub async fn get_session_bundle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TierQuery>,
) -> Result<Json<EncryptedBundle>, ApiError> {
    check_session_id(&id)?;
    state
        .store(query.tier)
        .get(&id)
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TierQuery>,
) -> Result<Json<EvictResponse>, ApiError> {
    check_session_id(&id)?;
    let evicted = state.store(query.tier).evict(&id);
    if evicted {
        info!("evicted {} session {}", query.tier.as_str(), id);
    }
    Ok(Json(EvictResponse { evicted }))
}
