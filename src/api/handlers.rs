//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint. Each handler is a
//! thin translation onto one `Cache` operation.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;

use crate::cache::Cache;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    CountResponse, DeleteResponse, GetOrCreateRequest, GetResponse, HealthResponse, KeysResponse,
    RememberRequest, SetRequest, SetResponse, StatsResponse, TagsRequest,
};

/// Application state shared across all handlers.
///
/// `Cache` is already a shared handle, so no extra locking is needed.
#[derive(Clone, Debug)]
pub struct AppState {
    pub cache: Cache,
}

impl AppState {
    /// Creates a new AppState around the given cache.
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Creates a new AppState from configuration, connecting to the remote
    /// store when one is selected.
    pub async fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(Cache::from_config(config).await?))
    }
}

fn invalid(message: Option<String>) -> Result<()> {
    match message {
        Some(msg) => Err(CacheError::InvalidArgument(msg)),
        None => Ok(()),
    }
}

/// Handler for PUT /set
///
/// Stores a key-value pair in the cache with optional TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    invalid(req.validate())?;

    let ttl = req.ttl.map(Duration::from_secs);
    state.cache.create_value(req.key.as_str(), req.value, ttl).await?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
///
/// Retrieves a value from the cache by key. A set written by `remember`
/// answers with its first member.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get_value::<Value>(key.as_str()).await {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for POST /get-or-create
pub async fn get_or_create_handler(
    State(state): State<AppState>,
    Json(req): Json<GetOrCreateRequest>,
) -> Result<Json<GetResponse>> {
    invalid(req.validate())?;

    let value = state
        .cache
        .get_or_create_value(req.key.as_str(), req.fallback)
        .await?;
    Ok(Json(GetResponse::new(req.key, value)))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state.cache.remove(key.as_str()).await?;
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for DELETE /prefix/:prefix
pub async fn remove_prefix_handler(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<CountResponse>> {
    let removed = state.cache.remove_starting_with(&prefix).await?;
    Ok(Json(CountResponse::new(removed)))
}

/// Handler for POST /remember
///
/// Adds the data to the key's set and indexes the key under each tag.
pub async fn remember_handler(
    State(state): State<AppState>,
    Json(req): Json<RememberRequest>,
) -> Result<Json<SetResponse>> {
    invalid(req.validate())?;

    state
        .cache
        .remember(req.key.as_str(), &req.data, &req.tags)
        .await?;
    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for POST /clear
pub async fn clear_handler(
    State(state): State<AppState>,
    Json(req): Json<TagsRequest>,
) -> Result<Json<CountResponse>> {
    invalid(req.validate())?;

    let removed = state.cache.clear(&req.tags).await?;
    Ok(Json(CountResponse::new(removed)))
}

/// Handler for GET /users/:id/tags
pub async fn user_tags_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<KeysResponse> {
    Json(KeysResponse::new(state.cache.user_tags(&user_id).await))
}

/// Handler for POST /users/:id/tags
///
/// Responds with the user's tags after the addition.
pub async fn add_user_tags_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<TagsRequest>,
) -> Result<Json<KeysResponse>> {
    invalid(req.validate())?;

    state.cache.add_tags_to_user(&user_id, &req.tags).await?;
    Ok(Json(KeysResponse::new(state.cache.user_tags(&user_id).await)))
}

/// Handler for DELETE /users/:id/tags
pub async fn remove_user_tags_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<TagsRequest>,
) -> Result<Json<CountResponse>> {
    let removed = state
        .cache
        .remove_tags_from_user(&user_id, &req.tags)
        .await?;
    Ok(Json(CountResponse::new(removed)))
}

/// Handler for GET /entities/:entity/keys
///
/// Lists every user tag whose name contains the entity.
pub async fn entity_keys_handler(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Json<KeysResponse> {
    Json(KeysResponse::new(state.cache.get_keys_by_tag(&entity).await))
}

/// Handler for DELETE /entities/:entity
pub async fn remove_entity_handler(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<CountResponse>> {
    let removed = state
        .cache
        .remove_keys_containing_entity_full_name(&entity)
        .await?;
    Ok(Json(CountResponse::new(removed)))
}

/// Handler for DELETE /entities/:entity/keys
///
/// 501 on backends that cannot enumerate their keys.
pub async fn remove_entity_keys_handler(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<CountResponse>> {
    let removed = state.cache.remove_keys_containing_key(&entity).await?;
    Ok(Json(CountResponse::new(removed)))
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.cache.stats();
    Json(StatsResponse::new(state.cache.backend_kind(), &stats))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.cache.backend_kind()))
}
