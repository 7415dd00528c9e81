use axum::{
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;

use crate::api::handlers;
use crate::logic::Catalog;
use crate::model::{Application, Image, Instance, Service, Template};
use crate::store::KvStore;

pub fn create_router<K: KvStore + 'static>() -> Router<Arc<Catalog<K>>> {
    let api = Router::new()
        // Applications
        .route(
            "/applications",
            get(handlers::list_entities::<K, Application>).post(handlers::create_application::<K>),
        )
        .route(
            "/applications/nextState",
            get(handlers::next_state::<K, Application>),
        )
        .route(
            "/applications/:id",
            get(handlers::get_entity::<K, Application>)
                .patch(handlers::patch_entity::<K, Application>)
                .delete(handlers::delete_application::<K>),
        )
        // Services and their plans
        .route(
            "/services",
            get(handlers::list_entities::<K, Service>).post(handlers::create_service::<K>),
        )
        .route("/services/nextState", get(handlers::next_state::<K, Service>))
        .route(
            "/services/:id",
            get(handlers::get_entity::<K, Service>)
                .patch(handlers::patch_entity::<K, Service>)
                .delete(handlers::delete_service::<K>),
        )
        .route(
            "/services/:id/nextState",
            get(handlers::next_entity_state::<K, Service>),
        )
        .route(
            "/services/:id/plans",
            get(handlers::list_plans::<K>).post(handlers::add_plan::<K>),
        )
        .route(
            "/services/:id/plans/:plan_id",
            get(handlers::get_plan::<K>).delete(handlers::delete_plan::<K>),
        )
        // Instances
        .route(
            "/instances",
            get(handlers::list_entities::<K, Instance>).post(handlers::create_instance::<K>),
        )
        .route("/instances/nextState", get(handlers::next_state::<K, Instance>))
        .route(
            "/instances/:id",
            get(handlers::get_entity::<K, Instance>)
                .patch(handlers::patch_entity::<K, Instance>)
                .delete(handlers::delete_instance::<K>),
        )
        .route(
            "/instances/:id/nextState",
            get(handlers::next_entity_state::<K, Instance>),
        )
        // Images
        .route(
            "/images",
            get(handlers::list_entities::<K, Image>).post(handlers::create_image::<K>),
        )
        .route("/images/nextState", get(handlers::next_state::<K, Image>))
        .route(
            "/images/:id",
            get(handlers::get_entity::<K, Image>)
                .patch(handlers::patch_entity::<K, Image>)
                .delete(handlers::delete_entity::<K, Image>),
        )
        .route(
            "/images/:id/nextState",
            get(handlers::next_entity_state::<K, Image>),
        )
        // Templates
        .route(
            "/templates",
            get(handlers::list_entities::<K, Template>).post(handlers::create_template::<K>),
        )
        .route("/templates/nextState", get(handlers::next_state::<K, Template>))
        .route(
            "/templates/:id",
            get(handlers::get_entity::<K, Template>)
                .patch(handlers::patch_entity::<K, Template>)
                .delete(handlers::delete_entity::<K, Template>),
        )
        .route(
            "/templates/:id/nextState",
            get(handlers::next_entity_state::<K, Template>),
        )
        // Aggregate instance stability
        .route("/stable-state", get(handlers::stable_state::<K>));

    Router::new()
        .route("/healthz", get(handlers::health_check))
        .nest("/api/v1", api)
        .layer(CatchPanicLayer::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryKvStore, Repository};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let repository = Repository::new(Arc::new(MemoryKvStore::new()), "acme");
        let catalog = Arc::new(Catalog::new(repository, Duration::from_millis(50)));
        create_router().with_state(catalog)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-id", "router-test")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_unknown_entity() {
        let app = app();
        let (status, body) = call(&app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = call(&app, "GET", "/api/v1/services/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_create_patch_and_watch_over_http() {
        let app = app();
        let (status, service) =
            call(&app, "POST", "/api/v1/services", Some(json!({"Name": "db"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(service["State"], "deploying");
        assert_eq!(service["AuditTrail"]["CreatedBy"], "router-test");
        let id = service["Id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "PATCH",
            &format!("/api/v1/services/{}", id),
            Some(json!([{"op": "update", "field": "State", "value": "ready"}])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "PATCH",
            &format!("/api/v1/services/{}", id),
            Some(json!([{"op": "update", "field": "State", "value": "deploying"}])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not allowed"));

        let (status, list) = call(&app, "GET", "/api/v1/services", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);

        let (status, _) = call(&app, "GET", "/api/v1/services/nextState", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, change) =
            call(&app, "GET", "/api/v1/services/nextState?afterIndex=0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(change["id"], id.as_str());
        assert_eq!(change["state"], "deploying");
    }

    #[tokio::test]
    async fn test_encoded_slash_in_id_is_rejected() {
        let app = app();
        let (_, service) =
            call(&app, "POST", "/api/v1/services", Some(json!({"Name": "db"}))).await;
        let id = service["Id"].as_str().unwrap().to_string();
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/v1/services/{}/plans", id),
            Some(json!({"Name": "small", "Cost": "free"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) =
            call(&app, "DELETE", &format!("/api/v1/services/{}%2FPlans", id), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid Service id"));

        let (status, _) =
            call(&app, "GET", &format!("/api/v1/services/{}%2FState", id), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, service) = call(&app, "GET", &format!("/api/v1/services/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(service["Plans"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stable_state() {
        let app = app();
        let (status, report) = call(&app, "GET", "/api/v1/stable-state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["stable"], true);
    }
}
