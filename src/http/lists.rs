//! `IPListService` handlers.

use super::items::{Empty, ServerIdResponse};
use super::{AppState, call};
use crate::db::NewList;
use crate::error::ServiceError;
use crate::services::resolver::ListView;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

type RpcResult<T> = Result<Json<T>, ServiceError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListIdRequest {
    pub ip_list_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListResponse {
    pub ip_list_id: i64,
}

pub async fn create_ip_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewList>,
) -> RpcResult<CreateListResponse> {
    let services = &state.services;
    call(&state, &headers, "CreateIPList", |caller| async move {
        let ip_list_id = services.lists.create_list(caller, req).await?;
        Ok(CreateListResponse { ip_list_id })
    })
    .await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindListResponse {
    pub ip_list: Option<ListView>,
}

pub async fn find_enabled_ip_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ListIdRequest>,
) -> RpcResult<FindListResponse> {
    let services = &state.services;
    call(&state, &headers, "FindEnabledIPList", |caller| async move {
        let list = services.lists.find_enabled_list(caller, req.ip_list_id).await?;
        Ok(FindListResponse {
            ip_list: list.as_ref().map(ListView::from),
        })
    })
    .await
}

pub async fn delete_ip_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ListIdRequest>,
) -> RpcResult<Empty> {
    let services = &state.services;
    call(&state, &headers, "DeleteIPList", |caller| async move {
        services.lists.delete_list(caller, req.ip_list_id).await?;
        Ok(Empty {})
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerIdRequest {
    pub server_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListIdsResponse {
    pub ip_list_ids: Vec<i64>,
}

pub async fn delete_ip_lists_with_server_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ServerIdRequest>,
) -> RpcResult<ListIdsResponse> {
    let services = &state.services;
    call(&state, &headers, "DeleteIPListsWithServerId", |caller| async move {
        let ip_list_ids = services.lists.delete_server_lists(caller, req.server_id).await?;
        Ok(ListIdsResponse { ip_list_ids })
    })
    .await
}

pub async fn find_server_id_with_ip_list_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ListIdRequest>,
) -> RpcResult<ServerIdResponse> {
    let services = &state.services;
    call(&state, &headers, "FindServerIdWithIPListId", |caller| async move {
        let server_id = services.lists.find_server_id(caller, req.ip_list_id).await?;
        Ok(ServerIdResponse { server_id })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::{headers, state};

    fn new_list(body: serde_json::Value) -> NewList {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_list_lifecycle() {
        let state = state().await;

        let err = create_ip_list(
            State(state.clone()),
            headers("user-token"),
            Json(new_list(serde_json::json!({"type": "black", "isPublic": true}))),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied(_)));

        let Json(created) = create_ip_list(
            State(state.clone()),
            headers("admin-token"),
            Json(new_list(serde_json::json!({"name": "shop deny", "type": "black", "serverId": 10}))),
        )
        .await
        .unwrap();

        let Json(found) = find_enabled_ip_list(
            State(state.clone()),
            headers("user-token"),
            Json(ListIdRequest {
                ip_list_id: created.ip_list_id,
            }),
        )
        .await
        .unwrap();
        assert_eq!(found.ip_list.unwrap().name, "shop deny");

        let Json(server) = find_server_id_with_ip_list_id(
            State(state.clone()),
            headers("admin-token"),
            Json(ListIdRequest {
                ip_list_id: created.ip_list_id,
            }),
        )
        .await
        .unwrap();
        assert_eq!(server.server_id, 10);

        let Json(deleted) = delete_ip_lists_with_server_id(
            State(state.clone()),
            headers("admin-token"),
            Json(ServerIdRequest { server_id: 10 }),
        )
        .await
        .unwrap();
        assert_eq!(deleted.ip_list_ids, vec![created.ip_list_id]);

        let err = delete_ip_list(
            State(state.clone()),
            headers("admin-token"),
            Json(ListIdRequest {
                ip_list_id: created.ip_list_id,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::ListNotFound(_)));
    }
}
