use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

use crate::error::CatalogResult;
use crate::model::schema::STATE_FIELD;
use crate::model::Id;
use crate::store::{KvAction, KvStore};

/// Where a watch starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    /// Only mutations made after the call begins.
    Now,
    /// Mutations with a store index greater than this one.
    After(u64),
}

impl From<Option<u64>> for Sequence {
    fn from(index: Option<u64>) -> Self {
        match index {
            Some(index) => Sequence::After(index),
            None => Sequence::Now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub entity_id: Id,
    pub key: String,
    pub action: KvAction,
    pub value: Option<String>,
    pub index: u64,
}

/// A mutation of an entity's `State` key, or removal of the whole entity
/// (reported with `state: None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub id: Id,
    pub state: Option<String>,
    pub index: u64,
}

/// "Next mutation after index N" over one entity collection.
pub struct ChangeFeed<K: KvStore + ?Sized> {
    kv: Arc<K>,
    collection_path: String,
}

impl<K: KvStore + ?Sized> ChangeFeed<K> {
    pub fn new(kv: Arc<K>, collection_path: String) -> Self {
        Self {
            kv,
            collection_path,
        }
    }

    pub fn collection_path(&self) -> &str {
        &self.collection_path
    }

    /// Wait for the first mutation under `subtree_path` after `after` and
    /// return it. Intervening mutations are not coalesced: callers loop,
    /// feeding the returned index back in.
    pub async fn next(&self, subtree_path: &str, after: Sequence) -> CatalogResult<Change> {
        let after = match after {
            Sequence::Now => None,
            Sequence::After(index) => Some(index),
        };
        let event = self.kv.watch(subtree_path, after).await?;
        Ok(Change {
            entity_id: self.entity_id_of(&event.key, subtree_path),
            key: event.key,
            action: event.action,
            value: event.value,
            index: event.version,
        })
    }

    /// `next` bounded by `wait`; `Ok(None)` means nothing changed in time.
    pub async fn next_within(
        &self,
        subtree_path: &str,
        after: Sequence,
        wait: Duration,
    ) -> CatalogResult<Option<Change>> {
        match timeout(wait, self.next(subtree_path, after)).await {
            Ok(change) => change.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Skip mutations until one touches an entity's `State` (or removes the
    /// entity), or until `wait` elapses.
    pub async fn next_state(
        &self,
        subtree_path: &str,
        after: Sequence,
        wait: Duration,
    ) -> CatalogResult<Option<StateChange>> {
        let deadline = Instant::now() + wait;
        let mut after = after;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let Some(change) = self.next_within(subtree_path, after, remaining).await? else {
                return Ok(None);
            };
            if let Some(state_change) = self.as_state_change(&change) {
                return Ok(Some(state_change));
            }
            after = Sequence::After(change.index);
        }
    }

    fn as_state_change(&self, change: &Change) -> Option<StateChange> {
        let entity_root = format!("{}/{}", self.collection_path, change.entity_id);
        let is_state_key = change.key == format!("{}/{}", entity_root, STATE_FIELD);
        let is_removal = change.action == KvAction::Delete
            && (change.key == entity_root || !change.key.starts_with(&format!("{}/", entity_root)));

        if is_state_key && change.action != KvAction::Delete {
            let state = change
                .value
                .as_deref()
                .and_then(|raw| serde_json::from_str::<String>(raw).ok());
            Some(StateChange {
                id: change.entity_id.clone(),
                state,
                index: change.index,
            })
        } else if is_removal {
            Some(StateChange {
                id: change.entity_id.clone(),
                state: None,
                index: change.index,
            })
        } else {
            None
        }
    }

    /// First path segment below the collection, taken from the mutated key
    /// or, when an ancestor was removed, from the watched subtree.
    fn entity_id_of(&self, key: &str, subtree_path: &str) -> Id {
        let prefix = format!("{}/", self.collection_path);
        key.strip_prefix(&prefix)
            .or_else(|| subtree_path.strip_prefix(&prefix))
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string()
    }
}
