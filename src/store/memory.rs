use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::Notify;

use crate::store::traits::{KvAction, KvError, KvEvent, KvNode, KvResult, KvStore};

pub const DEFAULT_HISTORY_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct Leaf {
    value: String,
    version: u64,
}

#[derive(Debug)]
struct Inner {
    leaves: BTreeMap<String, Leaf>,
    revision: u64,
    history: VecDeque<KvEvent>,
    history_size: usize,
}

/// In-process hierarchical key-value store with a global revision counter,
/// compare-and-swap updates and a bounded event history backing `watch`.
///
/// Only leaves are stored; a directory exists while at least one leaf lives
/// under its prefix.
#[derive(Debug)]
pub struct MemoryKvStore {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_history_size(DEFAULT_HISTORY_SIZE)
    }

    pub fn with_history_size(history_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                leaves: BTreeMap::new(),
                revision: 0,
                history: VecDeque::new(),
                history_size: history_size.max(1),
            }),
            changed: Notify::new(),
        }
    }

    fn record(&self, inner: &mut Inner, action: KvAction, key: &str, value: Option<&str>) -> u64 {
        inner.revision += 1;
        let version = inner.revision;
        inner.history.push_back(KvEvent {
            action,
            key: key.to_string(),
            value: value.map(str::to_string),
            version,
        });
        while inner.history.len() > inner.history_size {
            inner.history.pop_front();
        }
        self.changed.notify_waiters();
        version
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(key: &str) -> KvResult<String> {
    if !key.starts_with('/') {
        return Err(KvError::InvalidKey(key.to_string()));
    }
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_string());
    }
    if trimmed[1..].split('/').any(str::is_empty) {
        return Err(KvError::InvalidKey(key.to_string()));
    }
    Ok(trimmed.to_string())
}

fn dir_prefix(key: &str) -> String {
    if key == "/" {
        "/".to_string()
    } else {
        format!("{}/", key)
    }
}

fn child_key(parent: &str, segment: &str) -> String {
    if parent == "/" {
        format!("/{}", segment)
    } else {
        format!("{}/{}", parent, segment)
    }
}

fn leaves_under<'a>(inner: &'a Inner, key: &str) -> Vec<(&'a str, &'a Leaf)> {
    let prefix = dir_prefix(key);
    inner
        .leaves
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .map(|(k, leaf)| (&k[prefix.len()..], leaf))
        .collect()
}

fn is_dir(inner: &Inner, key: &str) -> bool {
    let prefix = dir_prefix(key);
    inner
        .leaves
        .range(prefix.clone()..)
        .next()
        .map(|(k, _)| k.starts_with(&prefix))
        .unwrap_or(false)
}

/// Fails when some ancestor of `key` is a leaf or `key` itself is a directory.
fn check_writable(inner: &Inner, key: &str) -> KvResult<()> {
    if key == "/" {
        return Err(KvError::NotAFile(key.to_string()));
    }
    let mut end = 0;
    while let Some(pos) = key[end + 1..].find('/') {
        end += pos + 1;
        let ancestor = &key[..end];
        if inner.leaves.contains_key(ancestor) {
            return Err(KvError::NotADirectory(ancestor.to_string()));
        }
    }
    if is_dir(inner, key) {
        return Err(KvError::NotAFile(key.to_string()));
    }
    Ok(())
}

fn build_dir(key: &str, entries: Vec<(&str, &Leaf)>, recursive: bool) -> KvNode {
    let mut groups: BTreeMap<&str, Vec<(&str, &Leaf)>> = BTreeMap::new();
    for (rel, leaf) in entries {
        match rel.split_once('/') {
            Some((head, rest)) => groups.entry(head).or_default().push((rest, leaf)),
            None => groups.entry(rel).or_default().push(("", leaf)),
        }
    }

    let mut nodes = Vec::with_capacity(groups.len());
    for (segment, children) in groups {
        let path = child_key(key, segment);
        if let [("", leaf)] = children.as_slice() {
            nodes.push(KvNode {
                key: path,
                value: Some(leaf.value.clone()),
                dir: false,
                version: leaf.version,
                nodes: Vec::new(),
            });
        } else if recursive {
            nodes.push(build_dir(&path, children, true));
        } else {
            let version = children.iter().map(|(_, l)| l.version).max().unwrap_or(0);
            nodes.push(KvNode {
                key: path,
                value: None,
                dir: true,
                version,
                nodes: Vec::new(),
            });
        }
    }

    let version = nodes.iter().map(|n| n.version).max().unwrap_or(0);
    KvNode {
        key: key.to_string(),
        value: None,
        dir: true,
        version,
        nodes,
    }
}

fn event_matches(watched: &str, event: &KvEvent) -> bool {
    if watched == "/" || event.key == watched {
        return true;
    }
    if event.key.starts_with(&dir_prefix(watched)) {
        return true;
    }
    // Recursive delete of an ancestor removes the watched key as well.
    event.action == KvAction::Delete && watched.starts_with(&dir_prefix(&event.key))
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    async fn create(&self, key: &str, value: &str) -> KvResult<u64> {
        let key = normalize(key)?;
        let mut inner = self.inner.lock();
        check_writable(&inner, &key)?;
        if inner.leaves.contains_key(&key) {
            return Err(KvError::KeyExists(key));
        }
        let version = self.record(&mut inner, KvAction::Create, &key, Some(value));
        inner.leaves.insert(
            key,
            Leaf {
                value: value.to_string(),
                version,
            },
        );
        Ok(version)
    }

    async fn get(&self, key: &str, recursive: bool) -> KvResult<KvNode> {
        let key = normalize(key)?;
        let inner = self.inner.lock();
        if let Some(leaf) = inner.leaves.get(&key) {
            return Ok(KvNode {
                key,
                value: Some(leaf.value.clone()),
                dir: false,
                version: leaf.version,
                nodes: Vec::new(),
            });
        }
        let entries = leaves_under(&inner, &key);
        if entries.is_empty() {
            return Err(KvError::KeyNotFound(key));
        }
        Ok(build_dir(&key, entries, recursive))
    }

    async fn update(
        &self,
        key: &str,
        value: &str,
        expected_prev: Option<&str>,
        expected_version: Option<u64>,
    ) -> KvResult<u64> {
        let key = normalize(key)?;
        let mut inner = self.inner.lock();
        let current = match inner.leaves.get(&key) {
            Some(leaf) => leaf.clone(),
            None if is_dir(&inner, &key) => return Err(KvError::NotAFile(key)),
            None => return Err(KvError::KeyNotFound(key)),
        };
        if let Some(prev) = expected_prev {
            if prev != current.value {
                return Err(KvError::CompareFailed {
                    key,
                    reason: format!("[{} != {}]", prev, current.value),
                });
            }
        }
        if let Some(version) = expected_version {
            if version != current.version {
                return Err(KvError::CompareFailed {
                    key,
                    reason: format!("[{} != {}]", version, current.version),
                });
            }
        }
        let version = self.record(&mut inner, KvAction::Update, &key, Some(value));
        inner.leaves.insert(
            key,
            Leaf {
                value: value.to_string(),
                version,
            },
        );
        Ok(version)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<u64> {
        let key = normalize(key)?;
        let mut inner = self.inner.lock();
        check_writable(&inner, &key)?;
        let version = self.record(&mut inner, KvAction::Set, &key, Some(value));
        inner.leaves.insert(
            key,
            Leaf {
                value: value.to_string(),
                version,
            },
        );
        Ok(version)
    }

    async fn delete(&self, key: &str, recursive: bool) -> KvResult<u64> {
        let key = normalize(key)?;
        if key == "/" {
            return Err(KvError::InvalidKey(key));
        }
        let mut inner = self.inner.lock();
        if inner.leaves.remove(&key).is_some() {
            return Ok(self.record(&mut inner, KvAction::Delete, &key, None));
        }
        if !is_dir(&inner, &key) {
            return Err(KvError::KeyNotFound(key));
        }
        if !recursive {
            return Err(KvError::DirectoryNotEmpty(key));
        }
        let prefix = dir_prefix(&key);
        inner.leaves.retain(|k, _| !k.starts_with(&prefix));
        Ok(self.record(&mut inner, KvAction::Delete, &key, None))
    }

    async fn watch(&self, key: &str, after_version: Option<u64>) -> KvResult<KvEvent> {
        let key = normalize(key)?;
        let mut after = match after_version {
            Some(version) => version,
            None => self.inner.lock().revision,
        };

        loop {
            // Registered before scanning so a mutation between the scan and
            // the await still wakes us.
            let notified = self.changed.notified();
            {
                let inner = self.inner.lock();
                if let Some(oldest) = inner.history.front() {
                    if after + 1 < oldest.version {
                        return Err(KvError::EventIndexCleared {
                            requested: after + 1,
                            oldest: oldest.version,
                        });
                    }
                }
                if let Some(event) = inner
                    .history
                    .iter()
                    .find(|e| e.version > after && event_matches(&key, e))
                {
                    return Ok(event.clone());
                }
                after = after.max(inner.revision);
            }
            notified.await;
        }
    }

    async fn revision(&self) -> KvResult<u64> {
        Ok(self.inner.lock().revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_get_and_directory_listing() {
        let kv = MemoryKvStore::new();
        kv.create("/org/Services/a/Name", "\"db\"").await.unwrap();
        kv.create("/org/Services/a/Plans/p1/Name", "\"small\"").await.unwrap();
        kv.create("/org/Services/b/Name", "\"cache\"").await.unwrap();

        let leaf = kv.get("/org/Services/a/Name", false).await.unwrap();
        assert!(!leaf.dir);
        assert_eq!(leaf.value.as_deref(), Some("\"db\""));

        let shallow = kv.get("/org/Services", false).await.unwrap();
        assert!(shallow.dir);
        assert_eq!(shallow.nodes.len(), 2);
        assert!(shallow.nodes.iter().all(|n| n.dir && n.nodes.is_empty()));

        let deep = kv.get("/org/Services/a", true).await.unwrap();
        let plans = deep.nodes.iter().find(|n| n.name() == "Plans").unwrap();
        assert_eq!(plans.nodes[0].nodes[0].key, "/org/Services/a/Plans/p1/Name");
        assert_eq!(deep.version, 2);

        let err = kv.create("/org/Services/a/Name", "\"x\"").await.unwrap_err();
        assert_eq!(err, KvError::KeyExists("/org/Services/a/Name".to_string()));
        let err = kv.get("/org/Images", true).await.unwrap_err();
        assert!(matches!(err, KvError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn test_leaf_and_directory_cannot_overlap() {
        let kv = MemoryKvStore::new();
        kv.create("/a/b", "1").await.unwrap();
        assert!(matches!(kv.create("/a/b/c", "1").await, Err(KvError::NotADirectory(_))));
        assert!(matches!(kv.set("/a", "1").await, Err(KvError::NotAFile(_))));
        assert!(matches!(kv.create("relative", "1").await, Err(KvError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let kv = MemoryKvStore::new();
        let v1 = kv.create("/k", "\"a\"").await.unwrap();

        let err = kv.update("/k", "\"b\"", Some("\"x\""), None).await.unwrap_err();
        assert!(matches!(err, KvError::CompareFailed { .. }));
        let err = kv.update("/k", "\"b\"", None, Some(v1 + 10)).await.unwrap_err();
        assert!(matches!(err, KvError::CompareFailed { .. }));
        assert_eq!(kv.get("/k", false).await.unwrap().value.as_deref(), Some("\"a\""));

        let v2 = kv.update("/k", "\"b\"", Some("\"a\""), Some(v1)).await.unwrap();
        assert!(v2 > v1);
        assert!(matches!(
            kv.update("/missing", "1", None, None).await,
            Err(KvError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_recursive() {
        let kv = MemoryKvStore::new();
        kv.create("/org/Instances/i1/Name", "\"n\"").await.unwrap();
        kv.create("/org/Instances/i1/State", "\"requested\"").await.unwrap();

        assert!(matches!(
            kv.delete("/org/Instances/i1", false).await,
            Err(KvError::DirectoryNotEmpty(_))
        ));
        kv.delete("/org/Instances/i1", true).await.unwrap();
        assert!(matches!(
            kv.get("/org/Instances/i1", true).await,
            Err(KvError::KeyNotFound(_))
        ));
        assert!(matches!(
            kv.delete("/org/Instances/i1", true).await,
            Err(KvError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_watch_returns_first_matching_event_after_version() {
        let kv = MemoryKvStore::new();
        let v1 = kv.create("/org/Instances/i1/State", "\"requested\"").await.unwrap();
        kv.create("/org/Services/s1/State", "\"deploying\"").await.unwrap();
        let v3 = kv
            .update("/org/Instances/i1/State", "\"deploying\"", None, None)
            .await
            .unwrap();

        let event = kv.watch("/org/Instances", Some(0)).await.unwrap();
        assert_eq!(event.version, v1);
        let event = kv.watch("/org/Instances", Some(v1)).await.unwrap();
        assert_eq!(event.version, v3);
        assert_eq!(event.action, KvAction::Update);
    }

    #[tokio::test]
    async fn test_watch_blocks_until_mutation() {
        let kv = Arc::new(MemoryKvStore::new());
        let watcher = {
            let kv = kv.clone();
            tokio::spawn(async move { kv.watch("/org/Templates", None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        kv.create("/org/Images/x/State", "\"requested\"").await.unwrap();
        kv.create("/org/Templates/t/State", "\"in-progress\"").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), watcher)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.key, "/org/Templates/t/State");
    }

    #[tokio::test]
    async fn test_watch_reports_cleared_history() {
        let kv = MemoryKvStore::with_history_size(2);
        for i in 0..5 {
            kv.set("/k", &i.to_string()).await.unwrap();
        }
        let err = kv.watch("/k", Some(1)).await.unwrap_err();
        assert_eq!(err, KvError::EventIndexCleared { requested: 2, oldest: 4 });
    }
}
