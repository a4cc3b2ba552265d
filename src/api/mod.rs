//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /set` - Store a value, optionally with a TTL
//! - `GET /get/:key` - Retrieve a value by key
//! - `POST /get-or-create` - Read a key, storing a fallback on a miss
//! - `DELETE /del/:key` - Delete a key
//! - `DELETE /prefix/:prefix` - Delete every key under a prefix
//! - `POST /remember` - Add data to a key's set and tag the key
//! - `POST /clear` - Invalidate tags
//! - `GET|POST|DELETE /users/:id/tags` - Read or edit a user's tag set
//! - `GET /entities/:entity/keys` - User tags naming an entity
//! - `DELETE /entities/:entity` - Delete keys named by those tags
//! - `DELETE /entities/:entity/keys` - Also delete keys containing the entity
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
