use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CatalogError;
use crate::logic::{Catalog, StabilityReport, StateChange};
use crate::model::{
    Application, Entity, Id, Image, Instance, Patch, Service, ServicePlan, Template, UserContext,
};
use crate::store::KvStore;

pub type AppState<K> = Arc<Catalog<K>>;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub id: Id,
}

#[derive(Debug, Deserialize)]
pub struct NextStateQuery {
    #[serde(rename = "afterIndex")]
    pub after_index: Option<u64>,
}

impl From<CatalogError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::Validation(_) => StatusCode::BAD_REQUEST,
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::Conflict(_) => StatusCode::CONFLICT,
            CatalogError::Internal(detail) => {
                log::error!("request failed: {}", detail);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("internal server error")),
                );
            }
        };
        (status, Json(ErrorResponse::new(err.message())))
    }
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

// Generic per-collection handlers

pub async fn list_entities<K: KvStore + 'static, T: Entity>(
    State(catalog): State<AppState<K>>,
) -> ApiResult<Json<ListResponse<T>>> {
    let items = catalog.list::<T>().await?;
    Ok(Json(items.into()))
}

pub async fn get_entity<K: KvStore + 'static, T: Entity>(
    State(catalog): State<AppState<K>>,
    Path(id): Path<Id>,
) -> ApiResult<Json<T>> {
    Ok(Json(catalog.get::<T>(&id).await?))
}

pub async fn patch_entity<K: KvStore + 'static, T: Entity>(
    State(catalog): State<AppState<K>>,
    Path(id): Path<Id>,
    user: UserContext,
    RequestJson(patches): RequestJson<Vec<Patch>>,
) -> ApiResult<Json<T>> {
    Ok(Json(catalog.patch::<T>(&id, &patches, &user).await?))
}

pub async fn delete_entity<K: KvStore + 'static, T: Entity>(
    State(catalog): State<AppState<K>>,
    Path(id): Path<Id>,
) -> ApiResult<Json<DeleteResponse>> {
    catalog.delete::<T>(&id).await?;
    Ok(deleted::<T>(id))
}

pub async fn next_state<K: KvStore + 'static, T: Entity>(
    State(catalog): State<AppState<K>>,
    Query(query): Query<NextStateQuery>,
) -> ApiResult<Response> {
    let change = catalog.next_state::<T>(None, query.after_index).await?;
    Ok(state_change_response(change))
}

pub async fn next_entity_state<K: KvStore + 'static, T: Entity>(
    State(catalog): State<AppState<K>>,
    Path(id): Path<Id>,
    Query(query): Query<NextStateQuery>,
) -> ApiResult<Response> {
    catalog.get::<T>(&id).await?;
    let change = catalog.next_state::<T>(Some(&id), query.after_index).await?;
    Ok(state_change_response(change))
}

fn state_change_response(change: Option<StateChange>) -> Response {
    match change {
        Some(change) => Json(change).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn deleted<T: Entity>(id: Id) -> Json<DeleteResponse> {
    Json(DeleteResponse {
        message: format!("{} deleted", T::KIND),
        id,
    })
}

// Type-specific creation and deletion

pub async fn create_application<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    user: UserContext,
    RequestJson(application): RequestJson<Application>,
) -> ApiResult<(StatusCode, Json<Application>)> {
    let created = catalog.create_application(application, &user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_application<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    Path(id): Path<Id>,
) -> ApiResult<Json<DeleteResponse>> {
    catalog.delete_application(&id).await?;
    Ok(deleted::<Application>(id))
}

pub async fn create_service<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    user: UserContext,
    RequestJson(service): RequestJson<Service>,
) -> ApiResult<(StatusCode, Json<Service>)> {
    let created = catalog.create_service(service, &user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_service<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    Path(id): Path<Id>,
) -> ApiResult<Json<DeleteResponse>> {
    catalog.delete_service(&id).await?;
    Ok(deleted::<Service>(id))
}

pub async fn create_instance<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    user: UserContext,
    RequestJson(instance): RequestJson<Instance>,
) -> ApiResult<(StatusCode, Json<Instance>)> {
    let created = catalog.create_instance(instance, &user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_instance<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    Path(id): Path<Id>,
) -> ApiResult<Json<DeleteResponse>> {
    catalog.delete_instance(&id).await?;
    Ok(deleted::<Instance>(id))
}

pub async fn create_image<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    user: UserContext,
    RequestJson(image): RequestJson<Image>,
) -> ApiResult<(StatusCode, Json<Image>)> {
    let created = catalog.create_image(image, &user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn create_template<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    user: UserContext,
    RequestJson(template): RequestJson<Template>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    let created = catalog.create_template(template, &user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

// Service plans

pub async fn list_plans<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    Path(service_id): Path<Id>,
) -> ApiResult<Json<ListResponse<ServicePlan>>> {
    let plans = catalog.list_plans(&service_id).await?;
    Ok(Json(plans.into()))
}

pub async fn get_plan<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    Path((service_id, plan_id)): Path<(Id, Id)>,
) -> ApiResult<Json<ServicePlan>> {
    Ok(Json(catalog.get_plan(&service_id, &plan_id).await?))
}

pub async fn add_plan<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    Path(service_id): Path<Id>,
    user: UserContext,
    RequestJson(plan): RequestJson<ServicePlan>,
) -> ApiResult<(StatusCode, Json<ServicePlan>)> {
    let created = catalog.add_plan(&service_id, plan, &user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_plan<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
    Path((service_id, plan_id)): Path<(Id, Id)>,
    user: UserContext,
) -> ApiResult<Json<DeleteResponse>> {
    catalog.delete_plan(&service_id, &plan_id, &user).await?;
    Ok(Json(DeleteResponse {
        message: "ServicePlan deleted".to_string(),
        id: plan_id,
    }))
}

/// Whether every instance has settled, for deploy tooling polling the catalog.
pub async fn stable_state<K: KvStore + 'static>(
    State(catalog): State<AppState<K>>,
) -> ApiResult<Json<StabilityReport>> {
    Ok(Json(catalog.stability().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (CatalogError::validation("bad"), StatusCode::BAD_REQUEST, "bad"),
            (CatalogError::not_found("gone"), StatusCode::NOT_FOUND, "gone"),
            (CatalogError::conflict("busy"), StatusCode::CONFLICT, "busy"),
            (
                CatalogError::internal("store exploded"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error",
            ),
        ];
        for (err, status, message) in cases {
            let (actual, Json(body)) = ApiError::from(err);
            assert_eq!(actual, status);
            assert_eq!(body.error, message);
        }
    }

    #[test]
    fn test_list_response_counts_items() {
        let list: ListResponse<u8> = vec![1, 2, 3].into();
        assert_eq!(list.total, 3);
    }
}
