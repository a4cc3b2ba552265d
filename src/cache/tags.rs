//! Tag Index Module
//!
//! Group writes and group invalidation on top of the facade. A tag is an
//! ordinary stored key whose envelope is the set of keys carrying it, and
//! each user owns a `user:{id}:tags` set of tag names.
//!
//! Tag sets are never pruned when a member expires on its own. Stale members
//! cost nothing on reads and are deleted harmlessly by the next `clear`.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::key::USER_TAGS_PREFIX;
use crate::cache::{encode, Cache, CacheKey, Capability, KeyPattern};
use crate::error::{CacheError, Result};

fn validate_tags<S: AsRef<str>>(tags: &[S]) -> Result<()> {
    if tags.iter().any(|tag| tag.as_ref().is_empty()) {
        return Err(CacheError::InvalidArgument(
            "Tags cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(CacheError::InvalidArgument(
            "User id cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_entity(entity: &str) -> Result<()> {
    if entity.is_empty() {
        return Err(CacheError::InvalidArgument(
            "Entity name cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn as_members<S: AsRef<str>>(tags: &[S]) -> Vec<Value> {
    tags.iter()
        .map(|tag| Value::String(tag.as_ref().to_string()))
        .collect()
}

impl Cache {
    // == Remember ==
    /// Adds `data` to the set stored at `key`, then records `key` under
    /// every tag in `tags`.
    ///
    /// Both steps are unions: earlier writers to the same key or tag are
    /// kept. A concurrent `clear` may observe only part of the fan-out.
    pub async fn remember<T, S>(&self, key: impl Into<CacheKey>, data: &T, tags: &[S]) -> Result<()>
    where
        T: Serialize + ?Sized,
        S: AsRef<str>,
    {
        let key: CacheKey = key.into();
        let key = key.validate()?;
        validate_tags(tags)?;
        let member = encode(data)?;
        let ttl = self.default_ttl();

        self.backend().add_member(key, member, ttl).await?;
        self.registry().track(key);

        for tag in tags {
            let tag = tag.as_ref();
            self.backend()
                .add_member(tag, Value::String(key.to_string()), ttl)
                .await?;
            self.registry().track(tag);
        }
        debug!("Remembered '{}' under {} tags", key, tags.len());
        Ok(())
    }

    // == Clear ==
    /// Invalidates each tag: every key it carries, the tag entry itself, and
    /// any tracked key whose name starts with the tag. Returns the number of
    /// entries deleted.
    pub async fn clear<S: AsRef<str>>(&self, tags: &[S]) -> Result<usize> {
        let mut removed = 0;

        for tag in tags {
            let tag = tag.as_ref();
            if tag.is_empty() {
                continue;
            }

            let members = self
                .backend()
                .load(tag)
                .await?
                .map(|envelope| envelope.string_members())
                .unwrap_or_default();

            for key in &members {
                if self.delete_tracked(key).await? {
                    removed += 1;
                }
            }
            if self.delete_tracked(tag).await? {
                removed += 1;
            }
            removed += self.remove_starting_with(tag).await?;
            debug!("Cleared tag '{}' ({} members)", tag, members.len());
        }
        Ok(removed)
    }

    /// Keys recorded under `tag`, including ones that may have expired since.
    pub async fn tag_members(&self, tag: &str) -> Vec<String> {
        self.load_or_miss(tag)
            .await
            .map(|envelope| envelope.string_members())
            .unwrap_or_default()
    }

    // == User Tags ==
    /// Adds `tags` to the tag set of `user_id`.
    pub async fn add_tags_to_user<S: AsRef<str>>(&self, user_id: &str, tags: &[S]) -> Result<()> {
        validate_user_id(user_id)?;
        let key = CacheKey::user_tags(user_id);
        let key = key.validate()?;
        validate_tags(tags)?;
        let ttl = self.default_ttl();

        for member in as_members(tags) {
            self.backend().add_member(key, member, ttl).await?;
        }
        if !tags.is_empty() {
            self.registry().track(key);
        }
        Ok(())
    }

    /// Removes `tags` from the tag set of `user_id`. An emptied set is
    /// deleted. Returns how many tags were removed.
    pub async fn remove_tags_from_user<S: AsRef<str>>(&self, user_id: &str, tags: &[S]) -> Result<usize> {
        validate_user_id(user_id)?;
        let key = CacheKey::user_tags(user_id);
        self.remove_user_tags(key.as_str(), &as_members(tags)).await
    }

    /// Tags currently held by `user_id`.
    pub async fn user_tags(&self, user_id: &str) -> Vec<String> {
        self.tag_members(CacheKey::user_tags(user_id).as_str()).await
    }

    /// Every tag, across all known users, whose name contains `entity`.
    ///
    /// A linear scan over the user tag sets; meant for explicit
    /// invalidation, not the read path.
    pub async fn get_keys_by_tag(&self, entity: &str) -> Vec<String> {
        if entity.is_empty() {
            return Vec::new();
        }

        let user_keys = match self.user_tag_keys().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!("User tag listing degraded to tracked keys: {}", err);
                self.registry().matching(CacheKey::is_user_tags)
            }
        };

        let mut seen = BTreeSet::new();
        let mut matching = Vec::new();
        for user_key in &user_keys {
            for tag in self.tag_members(user_key).await {
                if tag.contains(entity) && seen.insert(tag.clone()) {
                    matching.push(tag);
                }
            }
        }
        matching
    }

    /// Deletes every cached key named by a user tag containing `entity`,
    /// and drops those tags from each user's set. Returns the number of
    /// cache entries deleted.
    pub async fn remove_keys_containing_entity_full_name(&self, entity: &str) -> Result<usize> {
        validate_entity(entity)?;
        self.sweep_user_tags(entity).await
    }

    /// Like [`Cache::remove_keys_containing_entity_full_name`], and also
    /// deletes every stored key whose name contains `entity`.
    ///
    /// Needs a backend that can list its own keys; others report
    /// `Unsupported`.
    pub async fn remove_keys_containing_key(&self, entity: &str) -> Result<usize> {
        if !self.supports(Capability::EntityKeySweep) {
            return Err(CacheError::Unsupported {
                operation: "remove_keys_containing_key",
                backend: self.backend_kind().as_str(),
            });
        }
        validate_entity(entity)?;

        let mut removed = self.sweep_user_tags(entity).await?;

        let mut candidates: BTreeSet<String> =
            self.registry().containing(entity).into_iter().collect();
        candidates.extend(
            self.backend()
                .scan(&KeyPattern::Contains(entity.to_string()))
                .await?,
        );
        for key in candidates.iter().filter(|key| !CacheKey::is_user_tags(key)) {
            if self.delete_tracked(key).await? {
                removed += 1;
            }
        }
        debug!("Swept {} keys containing '{}'", removed, entity);
        Ok(removed)
    }

    // == Internal Helpers ==
    /// Known `user:{id}:tags` keys: tracked ones, plus the store's own
    /// listing when it has one.
    async fn user_tag_keys(&self) -> Result<Vec<String>> {
        let mut keys: BTreeSet<String> = self
            .registry()
            .matching(CacheKey::is_user_tags)
            .into_iter()
            .collect();

        if self.supports(Capability::KeyEnumeration) {
            let listed = self
                .backend()
                .scan(&KeyPattern::Prefix(USER_TAGS_PREFIX.to_string()))
                .await?;
            keys.extend(listed.into_iter().filter(|key| CacheKey::is_user_tags(key)));
        }
        Ok(keys.into_iter().collect())
    }

    async fn sweep_user_tags(&self, entity: &str) -> Result<usize> {
        let mut removed = 0;

        for user_key in self.user_tag_keys().await? {
            let matching: Vec<String> = self
                .backend()
                .load(&user_key)
                .await?
                .map(|envelope| envelope.string_members())
                .unwrap_or_default()
                .into_iter()
                .filter(|tag| tag.contains(entity))
                .collect();
            if matching.is_empty() {
                continue;
            }

            for tag in &matching {
                if self.delete_tracked(tag).await? {
                    removed += 1;
                }
            }
            self.remove_user_tags(&user_key, &as_members(&matching)).await?;
        }
        Ok(removed)
    }

    async fn remove_user_tags(&self, user_key: &str, members: &[Value]) -> Result<usize> {
        let removed = self.backend().remove_members(user_key, members).await?;
        if removed > 0 && self.backend().load(user_key).await?.is_none() {
            self.registry().forget(user_key);
            self.retrack_if_live(user_key).await;
        }
        Ok(removed)
    }
}
