use serde_json::Value;
use std::sync::Arc;

use crate::error::{CatalogError, CatalogResult};
use crate::logic::lifecycle;
use crate::logic::mapper::{self, join_path};
use crate::logic::patch::{translate, KeyWrite, WritePlan};
use crate::model::schema::{AUDIT_TRAIL_FIELD, NAME_FIELD, STATE_FIELD};
use crate::model::{generate_id, validate_name, AuditTrail, Entity, Patch, PatchOperation, UserContext};
use crate::store::traits::{KvError, KvStore};

/// Typed reads and writes of catalog entities under `/<organization>/`.
///
/// Holds no mutable state; every concurrency decision is delegated to the
/// store's compare-and-swap. Writes of one call are not atomic as a group:
/// a failure part way leaves earlier writes applied.
pub struct Repository<K: KvStore + ?Sized> {
    kv: Arc<K>,
    organization: String,
}

impl<K: KvStore + ?Sized> Clone for Repository<K> {
    fn clone(&self) -> Self {
        Self {
            kv: self.kv.clone(),
            organization: self.organization.clone(),
        }
    }
}

impl<K: KvStore + ?Sized> Repository<K> {
    pub fn new(kv: Arc<K>, organization: impl Into<String>) -> Self {
        Self {
            kv,
            organization: organization.into(),
        }
    }

    pub fn store(&self) -> &Arc<K> {
        &self.kv
    }

    pub fn collection_path<T: Entity>(&self) -> String {
        format!("/{}/{}", self.organization, T::KIND.collection())
    }

    /// Key path of one entity. The id must be a single, non-empty key
    /// segment, otherwise it would address the collection itself or a
    /// subtree inside another entity.
    pub fn entity_path<T: Entity>(&self, id: &str) -> CatalogResult<String> {
        if id.is_empty() || id.contains('/') {
            return Err(CatalogError::validation(format!("invalid {} id '{}'", T::KIND, id)));
        }
        Ok(join_path(&self.collection_path::<T>(), id))
    }

    /// Store a new entity. The caller must leave `Id` empty; a fresh one is
    /// assigned, as are missing collection element ids. `State` is written last.
    pub async fn create<T: Entity>(&self, entity: T, actor: &UserContext) -> CatalogResult<T> {
        if !entity.id().is_empty() {
            return Err(CatalogError::validation("field Id has to be empty on create"));
        }
        if let Some(name) = entity.name() {
            validate_name(name)?;
            if self.exists_by_name::<T>(name).await? {
                return Err(CatalogError::conflict(format!(
                    "{} with name {} already exists",
                    T::KIND,
                    name
                )));
            }
        }

        let mut entity = entity;
        entity.set_id(generate_id());
        *entity.audit_trail_mut() = AuditTrail::new(&actor.user_id);

        let mut value = serde_json::to_value(&entity)?;
        mapper::fill_missing_ids(T::schema(), &mut value);
        mapper::canonical_order(T::schema(), &mut value);
        let entity: T = serde_json::from_value(value)?;

        let path = self.entity_path::<T>(entity.id())?;
        let state_key = join_path(&path, STATE_FIELD);
        let mut key_values = mapper::to_key_values(&self.collection_path::<T>(), &entity)?;
        let state_value = key_values.remove(&state_key);

        for (key, value) in key_values.iter().chain(state_value.as_ref().map(|v| (&state_key, v))) {
            self.kv
                .create(key, value)
                .await
                .map_err(|e| self.write_failure::<T>(key, e))?;
        }

        log::debug!("created {} {} at {}", T::KIND, entity.id(), path);
        Ok(entity)
    }

    pub async fn get<T: Entity>(&self, id: &str) -> CatalogResult<T> {
        let path = self.entity_path::<T>(id)?;
        let node = match self.kv.get(&path, true).await {
            Ok(node) => node,
            Err(KvError::KeyNotFound(_)) => {
                return Err(CatalogError::not_found(format!("{} {} not found", T::KIND, id)))
            }
            Err(e) => return Err(self.read_failure::<T>(&path, e)),
        };
        mapper::from_node(&node).map_err(|e| {
            log::error!("cannot read {} at {}: {}", T::KIND, path, e);
            e
        })
    }

    /// Every entity of the collection. A child that cannot be decoded fails
    /// the whole call.
    pub async fn list<T: Entity>(&self) -> CatalogResult<Vec<T>> {
        let path = self.collection_path::<T>();
        let root = match self.kv.get(&path, true).await {
            Ok(node) => node,
            Err(KvError::KeyNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(self.read_failure::<T>(&path, e)),
        };

        root.nodes
            .iter()
            .map(|child| {
                mapper::from_node::<T>(child).map_err(|e| {
                    log::error!("cannot list {} entry {}: {}", T::KIND, child.key, e);
                    CatalogError::internal(format!("malformed {} in collection", T::KIND))
                })
            })
            .collect()
    }

    pub async fn exists_by_name<T: Entity>(&self, name: &str) -> CatalogResult<bool> {
        Ok(self.find_by_name::<T>(name).await?.is_some())
    }

    pub async fn find_by_name<T: Entity>(&self, name: &str) -> CatalogResult<Option<T>> {
        Ok(self
            .list::<T>()
            .await?
            .into_iter()
            .find(|e| e.name() == Some(name)))
    }

    pub async fn delete<T: Entity>(&self, id: &str) -> CatalogResult<()> {
        let path = self.entity_path::<T>(id)?;
        match self.kv.delete(&path, true).await {
            Ok(_) => {
                log::debug!("deleted {} {}", T::KIND, id);
                Ok(())
            }
            Err(KvError::KeyNotFound(_)) => {
                Err(CatalogError::not_found(format!("{} {} not found", T::KIND, id)))
            }
            Err(e) => Err(self.write_failure::<T>(&path, e)),
        }
    }

    /// Validate and apply `patches`, then return the entity as re-read.
    ///
    /// Writes go add, update, delete, audit trail, then `State`; each update is a
    /// compare-and-swap against the value read just before it, and against
    /// the patch's `prevValue` when one is given. A `State` update is checked
    /// against the lifecycle table and conditioned on the state it was
    /// checked against.
    pub async fn apply_patch<T: Entity>(
        &self,
        id: &str,
        patches: &[Patch],
        actor: &UserContext,
    ) -> CatalogResult<T> {
        if patches.is_empty() {
            return Err(CatalogError::validation("patch list is empty"));
        }
        let path = self.entity_path::<T>(id)?;
        match self.kv.get(&path, false).await {
            Ok(_) => {}
            Err(KvError::KeyNotFound(_)) => {
                return Err(CatalogError::not_found(format!("{} {} not found", T::KIND, id)))
            }
            Err(e) => return Err(self.read_failure::<T>(&path, e)),
        }

        let mut patches = patches.to_vec();
        let transition = self.check_transition::<T>(&path, &mut patches).await?;
        self.check_rename::<T>(id, &patches).await?;

        let plan = translate(&path, T::schema(), &patches)?;
        self.execute::<T>(&path, &plan, actor).await?;

        if let Some((from, to)) = transition {
            lifecycle::on_transition(T::KIND, id, &from, &to);
        }
        log::debug!("applied {} patch(es) to {} {}", patches.len(), T::KIND, id);
        self.get(id).await
    }

    /// Lifecycle check of the `State` patch, if any. Pins the patch's
    /// `prevValue` to the validated state so racing transitions conflict.
    async fn check_transition<T: Entity>(
        &self,
        path: &str,
        patches: &mut [Patch],
    ) -> CatalogResult<Option<(String, String)>> {
        let Some(patch) = patches.iter_mut().find(|p| {
            p.operation == PatchOperation::Update
                && p.field.trim_matches('/') == STATE_FIELD
                && p.has_value()
        }) else {
            return Ok(None);
        };
        if !T::schema().has_field(STATE_FIELD) {
            return Err(CatalogError::validation(format!(
                "field {} does not exist in {}",
                STATE_FIELD,
                T::KIND
            )));
        }
        let proposed = patch
            .value
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| CatalogError::validation("field State must be a string"))?
            .to_string();

        let state_key = join_path(path, STATE_FIELD);
        let current = match self.kv.get(&state_key, false).await {
            Ok(node) => decode_string(node.value.as_deref().unwrap_or_default()).ok_or_else(|| {
                log::error!("{} holds a malformed state", state_key);
                CatalogError::internal(format!("malformed {} state", T::KIND))
            })?,
            Err(e) => return Err(self.read_failure::<T>(&state_key, e)),
        };

        let expected = match &patch.prev_value {
            None => None,
            Some(Value::String(expected)) => Some(expected.as_str()),
            Some(_) => {
                return Err(CatalogError::validation(format!(
                    "prevValue of field {} must be a string",
                    STATE_FIELD
                )))
            }
        };
        if let Some(expected) = expected {
            if expected != current {
                return Err(CatalogError::conflict(format!(
                    "{} state is {}, expected {}",
                    T::KIND,
                    current,
                    expected
                )));
            }
        }
        lifecycle::validate(T::KIND, &current, &proposed)?;
        patch.prev_value = Some(Value::String(current.clone()));
        Ok(Some((current, proposed)))
    }

    async fn check_rename<T: Entity>(&self, id: &str, patches: &[Patch]) -> CatalogResult<()> {
        let renamed = patches.iter().find_map(|p| {
            (p.operation == PatchOperation::Update && p.field.trim_matches('/') == NAME_FIELD)
                .then(|| p.value.as_ref().and_then(Value::as_str))
                .flatten()
        });
        let Some(name) = renamed else {
            return Ok(());
        };
        if let Some(existing) = self.find_by_name::<T>(name).await? {
            if existing.id() != id {
                return Err(CatalogError::conflict(format!(
                    "{} with name {} already exists",
                    T::KIND,
                    name
                )));
            }
        }
        Ok(())
    }

    /// The audit trail is refreshed before the `State` write so a watcher
    /// woken by the state change reads the entity as a whole.
    async fn execute<T: Entity>(
        &self,
        path: &str,
        plan: &WritePlan,
        actor: &UserContext,
    ) -> CatalogResult<()> {
        for write in &plan.add {
            self.kv
                .set(&write.key, &write.value)
                .await
                .map_err(|e| self.write_failure::<T>(&write.key, e))?;
        }
        for write in &plan.update {
            self.compare_and_swap::<T>(write).await?;
        }
        for key in &plan.delete {
            match self.kv.delete(key, true).await {
                Ok(_) => {}
                Err(KvError::KeyNotFound(_)) => {
                    return Err(CatalogError::not_found(format!("{} not found", key)))
                }
                Err(e) => return Err(self.write_failure::<T>(key, e)),
            }
        }
        self.touch::<T>(path, actor).await?;
        if let Some(write) = &plan.state {
            self.compare_and_swap::<T>(write).await?;
        }
        Ok(())
    }

    /// Read the live leaf, check it against the expected previous value and
    /// write conditioned on the exact value and version just read.
    async fn compare_and_swap<T: Entity>(&self, write: &KeyWrite) -> CatalogResult<()> {
        let current = match self.kv.get(&write.key, false).await {
            Ok(node) if node.dir => {
                return Err(CatalogError::validation(format!(
                    "{} is not a scalar field",
                    write.key
                )))
            }
            Ok(node) => node,
            Err(KvError::KeyNotFound(_)) => {
                if write.prev_value.is_some() {
                    return Err(CatalogError::conflict(format!(
                        "{} was removed concurrently",
                        write.key
                    )));
                }
                // Field absent from entities stored before it existed.
                return self
                    .kv
                    .create(&write.key, &write.value)
                    .await
                    .map(|_| ())
                    .map_err(|e| self.cas_failure::<T>(&write.key, e));
            }
            Err(e) => return Err(self.read_failure::<T>(&write.key, e)),
        };

        let live = current.value.unwrap_or_default();
        if let Some(expected) = &write.prev_value {
            if !same_json(expected, &live) {
                return Err(CatalogError::conflict(format!(
                    "{} was modified concurrently: expected {}, found {}",
                    write.key, expected, live
                )));
            }
        }
        self.kv
            .update(&write.key, &write.value, Some(&live), Some(current.version))
            .await
            .map(|_| ())
            .map_err(|e| self.cas_failure::<T>(&write.key, e))
    }

    /// Audit trail bookkeeping is not concurrency sensitive.
    async fn touch<T: Entity>(&self, path: &str, actor: &UserContext) -> CatalogResult<()> {
        if !T::schema().has_field(AUDIT_TRAIL_FIELD) {
            return Ok(());
        }
        let trail = join_path(path, AUDIT_TRAIL_FIELD);
        let now = serde_json::to_string(&chrono::Utc::now())?;
        let by = serde_json::to_string(&actor.user_id)?;
        for (field, value) in [("LastUpdatedOn", now), ("LastUpdateBy", by)] {
            let key = join_path(&trail, field);
            self.kv
                .set(&key, &value)
                .await
                .map_err(|e| self.write_failure::<T>(&key, e))?;
        }
        Ok(())
    }

    fn cas_failure<T: Entity>(&self, key: &str, err: KvError) -> CatalogError {
        match err {
            KvError::CompareFailed { .. } | KvError::KeyExists(_) => err.into(),
            other => self.write_failure::<T>(key, other),
        }
    }

    fn read_failure<T: Entity>(&self, key: &str, err: KvError) -> CatalogError {
        log::error!("reading {} at {} failed: {}", T::KIND, key, err);
        CatalogError::internal(format!("cannot read {}", T::KIND))
    }

    fn write_failure<T: Entity>(&self, key: &str, err: KvError) -> CatalogError {
        log::error!("writing {} at {} failed: {}", T::KIND, key, err);
        CatalogError::internal(format!("cannot write {}", T::KIND))
    }
}

fn decode_string(raw: &str) -> Option<String> {
    serde_json::from_str::<String>(raw).ok()
}

fn same_json(a: &str, b: &str) -> bool {
    match (serde_json::from_str::<Value>(a), serde_json::from_str::<Value>(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instance, InstanceState, Metadata, Service, ServiceState};
    use crate::store::MemoryKvStore;
    use serde_json::json;

    fn repository() -> Repository<MemoryKvStore> {
        Repository::new(Arc::new(MemoryKvStore::new()), "acme")
    }

    fn actor() -> UserContext {
        UserContext::new("tester".to_string())
    }

    fn service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            metadata: vec![Metadata {
                id: String::new(),
                key: "owner".to_string(),
                value: "ops".to_string(),
            }],
            ..Default::default()
        }
    }

    async fn instance(repo: &Repository<MemoryKvStore>, state: InstanceState) -> Instance {
        repo.create(
            Instance {
                name: format!("web-{}", state.as_str()),
                class_id: "svc".to_string(),
                state,
                ..Default::default()
            },
            &actor(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_get_list() {
        let repo = repository();
        let created = repo.create(service("db"), &actor()).await.unwrap();
        assert!(!created.id.is_empty());
        assert!(!created.metadata[0].id.is_empty());
        assert_eq!(created.audit_trail.created_by, "tester");

        let fetched: Service = repo.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);

        repo.create(service("cache"), &actor()).await.unwrap();
        let all: Vec<Service> = repo.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(repo.exists_by_name::<Service>("cache").await.unwrap());
        assert!(!repo.exists_by_name::<Service>("queue").await.unwrap());
    }

    #[tokio::test]
    async fn test_state_key_is_written_last_on_create() {
        let repo = repository();
        let created = repo.create(service("db"), &actor()).await.unwrap();
        let state_key = repo.entity_path::<Service>(&created.id).unwrap() + "/State";
        let node = repo.store().get(&state_key, false).await.unwrap();
        assert_eq!(node.version, repo.store().revision().await.unwrap());
    }

    #[tokio::test]
    async fn test_state_key_is_written_last_on_patch() {
        let repo = repository();
        let created = repo.create(service("db"), &actor()).await.unwrap();
        repo.apply_patch::<Service>(
            &created.id,
            &[
                Patch::update("Description", json!("primary")),
                Patch::update("State", json!("ready")).with_message("provisioned"),
            ],
            &actor(),
        )
        .await
        .unwrap();

        let state_key = repo.entity_path::<Service>(&created.id).unwrap() + "/State";
        let node = repo.store().get(&state_key, false).await.unwrap();
        assert_eq!(node.version, repo.store().revision().await.unwrap());
    }

    #[tokio::test]
    async fn test_create_returns_what_get_reads() {
        let repo = repository();
        let mut unsorted = service("db");
        unsorted.metadata = ["zz", "aa", "mm"]
            .iter()
            .map(|id| Metadata {
                id: id.to_string(),
                key: format!("key-{}", id),
                value: "v".to_string(),
            })
            .collect();
        unsorted.metadata.push(Metadata {
            id: String::new(),
            key: "generated".to_string(),
            value: "v".to_string(),
        });

        let created = repo.create(unsorted, &actor()).await.unwrap();
        let fetched: Service = repo.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(created.metadata.len(), 4);
    }

    #[tokio::test]
    async fn test_ids_must_be_single_segments() {
        let repo = repository();
        let created = repo.create(service("db"), &actor()).await.unwrap();
        repo.apply_patch::<Service>(
            &created.id,
            &[Patch::add("Plans", json!({"Name": "small", "Cost": "free"}))],
            &actor(),
        )
        .await
        .unwrap();

        let nested = format!("{}/Plans", created.id);
        assert!(repo.delete::<Service>(&nested).await.unwrap_err().is_validation());
        assert!(repo.get::<Service>(&nested).await.unwrap_err().is_validation());
        assert!(repo.get::<Service>("").await.unwrap_err().is_validation());
        assert!(repo
            .apply_patch::<Service>(&nested, &[Patch::update("Name", json!("x"))], &actor())
            .await
            .unwrap_err()
            .is_validation());

        let fetched: Service = repo.get(&created.id).await.unwrap();
        assert_eq!(fetched.plans.len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejections() {
        let repo = repository();
        repo.create(service("db"), &actor()).await.unwrap();

        let err = repo.create(service("db"), &actor()).await.unwrap_err();
        assert!(err.is_conflict());

        let mut with_id = service("other");
        with_id.id = "preset".to_string();
        assert!(repo.create(with_id, &actor()).await.unwrap_err().is_validation());
        assert!(repo.create(service("Bad_Name"), &actor()).await.unwrap_err().is_validation());

        let other_org = Repository::new(repo.store().clone(), "globex");
        assert!(other_org.create(service("db"), &actor()).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_and_delete_missing() {
        let repo = repository();
        assert!(repo.get::<Service>("nope").await.unwrap_err().is_not_found());
        assert!(repo.delete::<Service>("nope").await.unwrap_err().is_not_found());
        assert!(repo.list::<Service>().await.unwrap().is_empty());

        let created = repo.create(service("db"), &actor()).await.unwrap();
        repo.delete::<Service>(&created.id).await.unwrap();
        assert!(repo.get::<Service>(&created.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_malformed_child_aborts_list() {
        let repo = repository();
        repo.create(service("db"), &actor()).await.unwrap();
        repo.store().set("/acme/Services/broken/Name", "{not json").await.unwrap();
        let err = repo.list::<Service>().await.unwrap_err();
        assert!(matches!(err, CatalogError::Internal(_)));
    }

    #[tokio::test]
    async fn test_prev_value_mismatch_is_conflict_and_leaves_value() {
        let repo = repository();
        let created = repo.create(service("db"), &actor()).await.unwrap();

        let err = repo
            .apply_patch::<Service>(
                &created.id,
                &[Patch::update("Description", json!("new")).with_prev_value(json!("stale"))],
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        let fetched: Service = repo.get(&created.id).await.unwrap();
        assert_eq!(fetched.description, "");

        let updated: Service = repo
            .apply_patch(
                &created.id,
                &[Patch::update("Description", json!("new")).with_prev_value(json!(""))],
                &UserContext::new("editor".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(updated.description, "new");
        assert_eq!(updated.audit_trail.last_update_by, "editor");
        assert_eq!(updated.audit_trail.created_by, "tester");
    }

    #[tokio::test]
    async fn test_patch_lifecycle_checks() {
        let repo = repository();
        let created = repo.create(service("db"), &actor()).await.unwrap();
        assert_eq!(created.state, ServiceState::Deploying);

        let err = repo
            .apply_patch::<Service>(&created.id, &[Patch::update("State", json!("deploying"))], &actor())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let ready: Service = repo
            .apply_patch(
                &created.id,
                &[Patch::update("State", json!("ready")).with_message("provisioned")],
                &actor(),
            )
            .await
            .unwrap();
        assert_eq!(ready.state, ServiceState::Ready);
        assert!(ready
            .metadata
            .iter()
            .any(|m| m.key == crate::model::LAST_STATE_CHANGE_REASON && m.value == "provisioned"));
    }

    #[tokio::test]
    async fn test_stale_state_expectation_conflicts() {
        let repo = repository();
        let created = instance(&repo, InstanceState::Stopped).await;

        let err = repo
            .apply_patch::<Instance>(
                &created.id,
                &[Patch::update("State", json!("starting")).with_prev_value(json!("running"))],
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = repo
            .apply_patch::<Instance>(
                &created.id,
                &[Patch::update("State", json!("starting")).with_prev_value(json!(5))],
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
        let unchanged: Instance = repo.get(&created.id).await.unwrap();
        assert_eq!(unchanged.state, InstanceState::Stopped);

        let started: Instance = repo
            .apply_patch(&created.id, &[Patch::update("State", json!("starting"))], &actor())
            .await
            .unwrap();
        assert_eq!(started.state, InstanceState::Starting);
    }

    #[tokio::test]
    async fn test_patch_collections_and_rename() {
        let repo = repository();
        let created = repo.create(service("db"), &actor()).await.unwrap();
        repo.create(service("cache"), &actor()).await.unwrap();
        let metadata_id = created.metadata[0].id.clone();

        let patched: Service = repo
            .apply_patch(
                &created.id,
                &[
                    Patch::add("Plans", json!({"Name": "small", "Cost": "free"})),
                    Patch::delete(&format!("Metadata/{}", metadata_id)),
                ],
                &actor(),
            )
            .await
            .unwrap();
        assert_eq!(patched.plans.len(), 1);
        assert_eq!(patched.plans[0].name, "small");
        assert!(patched.metadata.is_empty());

        let err = repo
            .apply_patch::<Service>(&created.id, &[Patch::update("Name", json!("cache"))], &actor())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let err = repo
            .apply_patch::<Service>(&created.id, &[Patch::delete("Metadata/gone")], &actor())
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert!(repo
            .apply_patch::<Service>("missing", &[Patch::update("Description", json!("x"))], &actor())
            .await
            .unwrap_err()
            .is_not_found());
    }
}
