use std::time::Duration;

use crate::error::{CatalogError, CatalogResult};
use crate::logic::change_feed::{ChangeFeed, Sequence, StateChange};
use crate::logic::lifecycle::{self, StabilityReport};
use crate::model::{
    generate_id, validate_name, Application, Entity, Image, ImageState, Instance, InstanceState,
    InstanceType, Patch, Service, ServicePlan, ServiceState, Template, TemplateState, UserContext,
};
use crate::store::{KvStore, Repository};

/// The operations the HTTP layer exposes, on top of the generic repository:
/// initial states, references between entities, plans and the watches.
pub struct Catalog<K: KvStore + ?Sized> {
    repository: Repository<K>,
    watch_timeout: Duration,
}

impl<K: KvStore + ?Sized> Catalog<K> {
    pub fn new(repository: Repository<K>, watch_timeout: Duration) -> Self {
        Self {
            repository,
            watch_timeout,
        }
    }

    pub fn repository(&self) -> &Repository<K> {
        &self.repository
    }

    pub fn watch_timeout(&self) -> Duration {
        self.watch_timeout
    }

    pub async fn list<T: Entity>(&self) -> CatalogResult<Vec<T>> {
        self.repository.list().await
    }

    pub async fn get<T: Entity>(&self, id: &str) -> CatalogResult<T> {
        self.repository.get(id).await
    }

    pub async fn patch<T: Entity>(
        &self,
        id: &str,
        patches: &[Patch],
        actor: &UserContext,
    ) -> CatalogResult<T> {
        self.repository.apply_patch(id, patches, actor).await
    }

    pub async fn delete<T: Entity>(&self, id: &str) -> CatalogResult<()> {
        self.repository.delete::<T>(id).await
    }

    pub async fn create_application(
        &self,
        application: Application,
        actor: &UserContext,
    ) -> CatalogResult<Application> {
        if !application.image_id.is_empty() {
            self.require::<Image>(&application.image_id, "ImageId").await?;
        }
        if !application.template_id.is_empty() {
            self.require::<Template>(&application.template_id, "TemplateId").await?;
        }
        self.repository.create(application, actor).await
    }

    pub async fn create_service(&self, service: Service, actor: &UserContext) -> CatalogResult<Service> {
        if !service.template_id.is_empty() {
            self.require::<Template>(&service.template_id, "TemplateId").await?;
        }
        for (index, plan) in service.plans.iter().enumerate() {
            validate_name(&plan.name)?;
            if service.plans[..index].iter().any(|p| p.name == plan.name) {
                return Err(CatalogError::conflict(format!(
                    "plan with name {} already exists in service {}",
                    plan.name, service.name
                )));
            }
        }
        let service = Service {
            state: ServiceState::Deploying,
            ..service
        };
        self.repository.create(service, actor).await
    }

    pub async fn create_image(&self, image: Image, actor: &UserContext) -> CatalogResult<Image> {
        let image = Image {
            state: ImageState::Requested,
            ..image
        };
        self.repository.create(image, actor).await
    }

    pub async fn create_template(
        &self,
        template: Template,
        actor: &UserContext,
    ) -> CatalogResult<Template> {
        let template = Template {
            state: TemplateState::InProgress,
            ..template
        };
        self.repository.create(template, actor).await
    }

    /// New instances start `requested`. Their class, bindings and plan must
    /// all exist.
    pub async fn create_instance(
        &self,
        instance: Instance,
        actor: &UserContext,
    ) -> CatalogResult<Instance> {
        if instance.class_id.is_empty() {
            return Err(CatalogError::validation("field ClassId is empty!"));
        }
        match instance.instance_type {
            InstanceType::Application => {
                self.require::<Application>(&instance.class_id, "ClassId").await?;
                if instance.plan_id().is_some() {
                    return Err(CatalogError::validation(
                        "application instances cannot reference a service plan",
                    ));
                }
            }
            InstanceType::Service | InstanceType::ServiceBroker => {
                let service = self.require::<Service>(&instance.class_id, "ClassId").await?;
                if let Some(plan_id) = instance.plan_id() {
                    if service.plan(plan_id).is_none() {
                        return Err(CatalogError::validation(format!(
                            "plan {} does not exist in service {}",
                            plan_id, service.id
                        )));
                    }
                }
            }
        }
        for binding in &instance.bindings {
            if binding.id.is_empty() {
                return Err(CatalogError::validation("field Bindings has an element without Id"));
            }
            self.require::<Instance>(&binding.id, "Bindings").await?;
        }

        let instance = Instance {
            state: InstanceState::Requested,
            ..instance
        };
        self.repository.create(instance, actor).await
    }

    pub async fn delete_application(&self, id: &str) -> CatalogResult<()> {
        self.repository.get::<Application>(id).await?;
        self.ensure_no_instance_of(id).await?;
        self.repository.delete::<Application>(id).await
    }

    pub async fn delete_service(&self, id: &str) -> CatalogResult<()> {
        self.repository.get::<Service>(id).await?;
        self.ensure_no_instance_of(id).await?;
        self.repository.delete::<Service>(id).await
    }

    pub async fn delete_instance(&self, id: &str) -> CatalogResult<()> {
        self.repository.get::<Instance>(id).await?;
        let instances = self.repository.list::<Instance>().await?;
        if let Some(bound) = instances.iter().find(|i| i.id != id && i.is_bound_to(id)) {
            return Err(CatalogError::conflict(format!(
                "Instance {} is bound by instance {}",
                id, bound.id
            )));
        }
        self.repository.delete::<Instance>(id).await
    }

    pub async fn list_plans(&self, service_id: &str) -> CatalogResult<Vec<ServicePlan>> {
        Ok(self.repository.get::<Service>(service_id).await?.plans)
    }

    pub async fn get_plan(&self, service_id: &str, plan_id: &str) -> CatalogResult<ServicePlan> {
        let service = self.repository.get::<Service>(service_id).await?;
        service.plan(plan_id).cloned().ok_or_else(|| {
            CatalogError::not_found(format!("plan {} not found in service {}", plan_id, service_id))
        })
    }

    pub async fn add_plan(
        &self,
        service_id: &str,
        plan: ServicePlan,
        actor: &UserContext,
    ) -> CatalogResult<ServicePlan> {
        if !plan.id.is_empty() {
            return Err(CatalogError::validation("field Id has to be empty on create"));
        }
        validate_name(&plan.name)?;
        let service = self.repository.get::<Service>(service_id).await?;
        if service.plans.iter().any(|p| p.name == plan.name) {
            return Err(CatalogError::conflict(format!(
                "plan with name {} already exists in service {}",
                plan.name, service_id
            )));
        }

        let plan = ServicePlan {
            id: generate_id(),
            ..plan
        };
        let value = serde_json::to_value(&plan)?;
        self.repository
            .apply_patch::<Service>(service_id, &[Patch::add("Plans", value)], actor)
            .await?;
        Ok(plan)
    }

    pub async fn delete_plan(
        &self,
        service_id: &str,
        plan_id: &str,
        actor: &UserContext,
    ) -> CatalogResult<()> {
        self.get_plan(service_id, plan_id).await?;
        let instances = self.repository.list::<Instance>().await?;
        if let Some(user) = instances
            .iter()
            .find(|i| i.class_id == service_id && i.plan_id() == Some(plan_id))
        {
            return Err(CatalogError::conflict(format!(
                "plan {} is in use by instance {}",
                plan_id, user.id
            )));
        }
        self.repository
            .apply_patch::<Service>(
                service_id,
                &[Patch::delete(&format!("Plans/{}", plan_id))],
                actor,
            )
            .await?;
        Ok(())
    }

    pub async fn stability(&self) -> CatalogResult<StabilityReport> {
        let instances = self.repository.list::<Instance>().await?;
        Ok(lifecycle::check_stability(&instances))
    }

    pub fn change_feed<T: Entity>(&self) -> ChangeFeed<K> {
        ChangeFeed::new(
            self.repository.store().clone(),
            self.repository.collection_path::<T>(),
        )
    }

    /// Next `State` change in the collection, or of one entity when `id` is
    /// given, bounded by the configured watch timeout.
    pub async fn next_state<T: Entity>(
        &self,
        id: Option<&str>,
        after_index: Option<u64>,
    ) -> CatalogResult<Option<StateChange>> {
        let feed = self.change_feed::<T>();
        let subtree = match id {
            Some(id) => self.repository.entity_path::<T>(id)?,
            None => feed.collection_path().to_string(),
        };
        feed.next_state(&subtree, Sequence::from(after_index), self.watch_timeout)
            .await
    }

    async fn require<T: Entity>(&self, id: &str, field: &str) -> CatalogResult<T> {
        self.repository.get::<T>(id).await.map_err(|e| {
            if e.is_not_found() {
                CatalogError::validation(format!(
                    "field {} references {} {} which does not exist",
                    field,
                    T::KIND,
                    id
                ))
            } else {
                e
            }
        })
    }

    async fn ensure_no_instance_of(&self, class_id: &str) -> CatalogResult<()> {
        let instances = self.repository.list::<Instance>().await?;
        match instances.iter().find(|i| i.class_id == class_id) {
            Some(instance) => Err(CatalogError::conflict(format!(
                "{} is in use by instance {} ({})",
                class_id, instance.id, instance.name
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceBindings, Metadata, PLAN_ID_METADATA};
    use crate::store::MemoryKvStore;
    use serde_json::json;
    use std::sync::Arc;

    fn catalog() -> Catalog<MemoryKvStore> {
        let repository = Repository::new(Arc::new(MemoryKvStore::new()), "acme");
        Catalog::new(repository, Duration::from_millis(200))
    }

    fn actor() -> UserContext {
        UserContext::new("tester".to_string())
    }

    fn named_service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn service_instance(name: &str, class_id: &str) -> Instance {
        Instance {
            name: name.to_string(),
            instance_type: InstanceType::Service,
            class_id: class_id.to_string(),
            ..Default::default()
        }
    }

    async fn move_to(
        catalog: &Catalog<MemoryKvStore>,
        id: &str,
        state: &str,
    ) -> CatalogResult<Instance> {
        catalog
            .patch::<Instance>(id, &[Patch::update("State", json!(state))], &actor())
            .await
    }

    #[tokio::test]
    async fn test_end_to_end_lifecycle() {
        let catalog = catalog();
        let service = catalog.create_service(named_service("db"), &actor()).await.unwrap();
        assert_eq!(service.state, ServiceState::Deploying);

        let instance = catalog
            .create_instance(service_instance("db-1", &service.id), &actor())
            .await
            .unwrap();
        assert_eq!(instance.state, InstanceState::Requested);

        assert_eq!(
            move_to(&catalog, &instance.id, "deploying").await.unwrap().state,
            InstanceState::Deploying
        );
        assert!(move_to(&catalog, &instance.id, "running")
            .await
            .unwrap_err()
            .is_validation());
        move_to(&catalog, &instance.id, "starting").await.unwrap();
        assert_eq!(
            move_to(&catalog, &instance.id, "running").await.unwrap().state,
            InstanceState::Running
        );

        let err = catalog.delete_service(&service.id).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.message().contains(&instance.id));

        catalog.delete_instance(&instance.id).await.unwrap();
        catalog.delete_service(&service.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_states_are_forced() {
        let catalog = catalog();
        let image = catalog
            .create_image(
                Image {
                    state: ImageState::Ready,
                    ..Default::default()
                },
                &actor(),
            )
            .await
            .unwrap();
        assert_eq!(image.state, ImageState::Requested);

        let template = catalog.create_template(Template::default(), &actor()).await.unwrap();
        assert_eq!(template.state, TemplateState::InProgress);
    }

    #[tokio::test]
    async fn test_instance_references_must_exist() {
        let catalog = catalog();
        let err = catalog
            .create_instance(service_instance("orphan", "missing"), &actor())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let app = catalog
            .create_application(
                Application {
                    name: "web".to_string(),
                    ..Default::default()
                },
                &actor(),
            )
            .await
            .unwrap();
        let as_service = catalog
            .create_instance(service_instance("wrong-type", &app.id), &actor())
            .await
            .unwrap_err();
        assert!(as_service.is_validation());

        let mut bound = Instance {
            name: "web-1".to_string(),
            class_id: app.id.clone(),
            ..Default::default()
        };
        bound.bindings.push(InstanceBindings {
            id: "nope".to_string(),
            data: Vec::new(),
        });
        assert!(catalog.create_instance(bound.clone(), &actor()).await.unwrap_err().is_validation());

        bound.bindings[0].id = String::new();
        assert!(catalog.create_instance(bound, &actor()).await.unwrap_err().is_validation());
        assert!(catalog.list::<Instance>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bound_instance_cannot_be_deleted() {
        let catalog = catalog();
        let app = catalog
            .create_application(
                Application {
                    name: "web".to_string(),
                    ..Default::default()
                },
                &actor(),
            )
            .await
            .unwrap();
        let target = catalog
            .create_instance(
                Instance {
                    name: "backend".to_string(),
                    class_id: app.id.clone(),
                    ..Default::default()
                },
                &actor(),
            )
            .await
            .unwrap();
        let client = catalog
            .create_instance(
                Instance {
                    name: "frontend".to_string(),
                    class_id: app.id.clone(),
                    bindings: vec![InstanceBindings {
                        id: target.id.clone(),
                        data: vec![Metadata::new("port", "8080")],
                    }],
                    ..Default::default()
                },
                &actor(),
            )
            .await
            .unwrap();

        let err = catalog.delete_instance(&target.id).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.message().contains(&client.id));

        catalog.delete_instance(&client.id).await.unwrap();
        catalog.delete_instance(&target.id).await.unwrap();
        assert!(catalog.delete_application(&app.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_plans() {
        let catalog = catalog();
        let service = catalog.create_service(named_service("db"), &actor()).await.unwrap();
        let small = catalog
            .add_plan(
                &service.id,
                ServicePlan {
                    name: "small".to_string(),
                    cost: "free".to_string(),
                    ..Default::default()
                },
                &actor(),
            )
            .await
            .unwrap();
        assert_eq!(catalog.get_plan(&service.id, &small.id).await.unwrap(), small);

        let duplicate = ServicePlan {
            name: "small".to_string(),
            ..Default::default()
        };
        assert!(catalog
            .add_plan(&service.id, duplicate, &actor())
            .await
            .unwrap_err()
            .is_conflict());

        let mut instance = service_instance("db-1", &service.id);
        instance.metadata.push(Metadata::new(PLAN_ID_METADATA, "unknown"));
        assert!(catalog
            .create_instance(instance.clone(), &actor())
            .await
            .unwrap_err()
            .is_validation());

        instance.metadata = vec![Metadata::new(PLAN_ID_METADATA, small.id.clone())];
        let instance = catalog.create_instance(instance, &actor()).await.unwrap();
        assert!(catalog
            .delete_plan(&service.id, &small.id, &actor())
            .await
            .unwrap_err()
            .is_conflict());

        catalog.delete_instance(&instance.id).await.unwrap();
        catalog.delete_plan(&service.id, &small.id, &actor()).await.unwrap();
        assert!(catalog.list_plans(&service.id).await.unwrap().is_empty());
        assert!(catalog
            .get_plan(&service.id, &small.id)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_plan_names_are_unique_on_service_create() {
        let catalog = catalog();
        let plan = |name: &str| ServicePlan {
            name: name.to_string(),
            ..Default::default()
        };
        let mut service = named_service("db");
        service.plans = vec![plan("small"), plan("large"), plan("small")];
        let err = catalog.create_service(service.clone(), &actor()).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(catalog.list::<Service>().await.unwrap().is_empty());

        service.plans.pop();
        let created = catalog.create_service(service, &actor()).await.unwrap();
        assert_eq!(created.plans.len(), 2);
    }

    #[tokio::test]
    async fn test_stability_and_next_state() {
        let catalog = catalog();
        let service = catalog.create_service(named_service("db"), &actor()).await.unwrap();
        let instance = catalog
            .create_instance(service_instance("db-1", &service.id), &actor())
            .await
            .unwrap();

        let report = catalog.stability().await.unwrap();
        assert!(!report.stable);
        assert!(report.message.contains(&instance.id));

        let after = catalog.repository().store().revision().await.unwrap();
        move_to(&catalog, &instance.id, "deploying").await.unwrap();
        let change = catalog
            .next_state::<Instance>(Some(&instance.id), Some(after))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.state.as_deref(), Some("deploying"));

        let idle = catalog
            .next_state::<Instance>(None, Some(change.index))
            .await
            .unwrap();
        assert!(idle.is_none());
    }
}
