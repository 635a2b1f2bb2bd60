//! `IPItemService` handlers.

use super::{AppState, call};
use crate::db::ItemFilter;
use crate::error::ServiceError;
use crate::services::gateway::{DeleteTarget, ItemInput};
use crate::services::resolver::{DecoratedItem, ItemView, SearchQuery, SearchResult, StatusCheck};
use crate::services::sync::SyncPage;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

type RpcResult<T> = Result<Json<T>, ServiceError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemIdRequest {
    pub ip_item_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemResponse {
    pub ip_item_id: i64,
}

pub async fn create_ip_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ItemInput>,
) -> RpcResult<CreateItemResponse> {
    let services = &state.services;
    call(&state, &headers, "CreateIPItem", |caller| async move {
        let ip_item_id = services.gateway.create_item(caller, &req).await?;
        Ok(CreateItemResponse { ip_item_id })
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateItemsRequest {
    pub ip_items: Vec<ItemInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemIdsResponse {
    pub ip_item_ids: Vec<i64>,
}

pub async fn create_ip_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateItemsRequest>,
) -> RpcResult<ItemIdsResponse> {
    let services = &state.services;
    call(&state, &headers, "CreateIPItems", |caller| async move {
        let ip_item_ids = services.gateway.create_items(caller, &req.ip_items).await?;
        Ok(ItemIdsResponse { ip_item_ids })
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateItemRequest {
    pub ip_item_id: i64,
    #[serde(flatten)]
    pub item: ItemInput,
}

#[derive(Debug, Serialize)]
pub struct Empty {}

pub async fn update_ip_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateItemRequest>,
) -> RpcResult<Empty> {
    let services = &state.services;
    call(&state, &headers, "UpdateIPItem", |caller| async move {
        services
            .gateway
            .update_item(caller, req.ip_item_id, &req.item)
            .await?;
        Ok(Empty {})
    })
    .await
}

/// Exactly one of `ipItemId`, `value` or `ipFrom` selects the targets.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteItemRequest {
    pub ip_item_id: i64,
    pub value: String,
    pub ip_from: String,
    pub ip_to: String,
    pub ip_list_id: i64,
}

impl DeleteItemRequest {
    fn target(&self) -> Result<DeleteTarget, ServiceError> {
        let by_id = self.ip_item_id > 0;
        let by_value = !self.value.trim().is_empty();
        let by_range = !self.ip_from.trim().is_empty();
        match (by_id, by_value, by_range) {
            (true, false, false) => Ok(DeleteTarget::Id(self.ip_item_id)),
            (false, true, false) => Ok(DeleteTarget::Value(self.value.clone())),
            (false, false, true) => Ok(DeleteTarget::Range {
                ip_from: self.ip_from.clone(),
                ip_to: self.ip_to.clone(),
            }),
            _ => Err(ServiceError::Validation(
                "exactly one of 'ipItemId', 'value' or 'ipFrom' is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

pub async fn delete_ip_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteItemRequest>,
) -> RpcResult<CountResponse> {
    let services = &state.services;
    call(&state, &headers, "DeleteIPItem", |caller| async move {
        let target = req.target()?;
        let list_id = (req.ip_list_id > 0).then_some(req.ip_list_id);
        let count = services.gateway.delete_item(caller, &target, list_id).await?;
        Ok(CountResponse { count: count as i64 })
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteItemsRequest {
    pub ip_item_ids: Vec<i64>,
}

pub async fn delete_ip_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeleteItemsRequest>,
) -> RpcResult<CountResponse> {
    let services = &state.services;
    call(&state, &headers, "DeleteIPItems", |caller| async move {
        let count = services.gateway.delete_items(caller, &req.ip_item_ids).await?;
        Ok(CountResponse { count: count as i64 })
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AfterVersionRequest {
    pub version: i64,
    pub size: i64,
}

pub async fn list_ip_items_after_version(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AfterVersionRequest>,
) -> RpcResult<SyncPage> {
    let services = &state.services;
    call(&state, &headers, "ListIPItemsAfterVersion", |caller| async move {
        services
            .sync
            .list_after_version(caller, req.version, req.size)
            .await
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckStatusRequest {
    pub ip_list_id: i64,
    pub ip: String,
}

pub async fn check_ip_item_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckStatusRequest>,
) -> RpcResult<StatusCheck> {
    let services = &state.services;
    call(&state, &headers, "CheckIPItemStatus", |caller| async move {
        services
            .resolver
            .check_status(caller, req.ip_list_id, &req.ip)
            .await
    })
    .await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindItemResponse {
    pub ip_item: Option<ItemView>,
}

pub async fn find_enabled_ip_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ItemIdRequest>,
) -> RpcResult<FindItemResponse> {
    let services = &state.services;
    call(&state, &headers, "FindEnabledIPItem", |caller| async move {
        let ip_item = services.resolver.find_item(caller, req.ip_item_id).await?;
        Ok(FindItemResponse { ip_item })
    })
    .await
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

pub async fn exists_enabled_ip_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ItemIdRequest>,
) -> RpcResult<ExistsResponse> {
    let services = &state.services;
    call(&state, &headers, "ExistsEnabledIPItem", |caller| async move {
        let exists = services.resolver.exists(caller, req.ip_item_id).await?;
        Ok(ExistsResponse { exists })
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListFilterRequest {
    pub ip_list_id: i64,
    pub keyword: String,
    pub ip_from: String,
    pub ip_to: String,
    pub event_level: String,
    pub offset: i64,
    pub size: i64,
}

impl ListFilterRequest {
    fn filter(&self) -> ItemFilter {
        ItemFilter {
            list_id: self.ip_list_id,
            keyword: self.keyword.trim().to_string(),
            ip_from: self.ip_from.trim().to_string(),
            ip_to: self.ip_to.trim().to_string(),
            event_level: self.event_level.trim().to_string(),
        }
    }
}

pub async fn count_ip_items_with_list_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ListFilterRequest>,
) -> RpcResult<CountResponse> {
    let services = &state.services;
    call(&state, &headers, "CountIPItemsWithListId", |caller| async move {
        let count = services.resolver.count_in_list(caller, &req.filter()).await?;
        Ok(CountResponse { count })
    })
    .await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoratedItemsResponse {
    pub ip_items: Vec<DecoratedItem>,
}

pub async fn list_ip_items_with_list_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ListFilterRequest>,
) -> RpcResult<DecoratedItemsResponse> {
    let services = &state.services;
    call(&state, &headers, "ListIPItemsWithListId", |caller| async move {
        let ip_items = services
            .resolver
            .list_in_list(caller, &req.filter(), req.offset, req.size)
            .await?;
        Ok(DecoratedItemsResponse { ip_items })
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    #[serde(flatten)]
    pub query: SearchQuery,
    pub offset: i64,
    pub size: i64,
}

pub async fn count_all_enabled_ip_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchQuery>,
) -> RpcResult<CountResponse> {
    let services = &state.services;
    call(&state, &headers, "CountAllEnabledIPItems", |caller| async move {
        let count = services.resolver.count_all(caller, &req).await?;
        Ok(CountResponse { count })
    })
    .await
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

pub async fn list_all_enabled_ip_items(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> RpcResult<SearchResponse> {
    let services = &state.services;
    call(&state, &headers, "ListAllEnabledIPItems", |caller| async move {
        let results = services
            .resolver
            .search_all(caller, &req.query, req.offset, req.size)
            .await?;
        Ok(SearchResponse { results })
    })
    .await
}

pub async fn list_all_ip_item_ids(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> RpcResult<ItemIdsResponse> {
    let services = &state.services;
    call(&state, &headers, "ListAllIPItemIds", |caller| async move {
        let ip_item_ids = services
            .resolver
            .list_ids(caller, &req.query, req.offset, req.size)
            .await?;
        Ok(ItemIdsResponse { ip_item_ids })
    })
    .await
}

pub async fn update_ip_items_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> RpcResult<CountResponse> {
    let services = &state.services;
    call(&state, &headers, "UpdateIPItemsRead", |caller| async move {
        let count = services.gateway.mark_read(caller).await?;
        Ok(CountResponse { count: count as i64 })
    })
    .await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerIdResponse {
    pub server_id: i64,
}

pub async fn find_server_id_with_ip_item_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ItemIdRequest>,
) -> RpcResult<ServerIdResponse> {
    let services = &state.services;
    call(&state, &headers, "FindServerIdWithIPItemId", |caller| async move {
        let server_id = services
            .resolver
            .find_server_id_with_item(caller, req.ip_item_id)
            .await?;
        Ok(ServerIdResponse { server_id })
    })
    .await
}
