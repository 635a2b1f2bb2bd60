//! RPC surface over HTTP.
//!
//! Every method is `POST /rpc/<Service>/<Method>` with a camelCase JSON
//! body and an `Authorization: Bearer <token>` header. `GET /metrics`
//! serves Prometheus text when enabled.

mod errors;
pub mod items;
pub mod lists;

use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::security::identity::{Caller, IdentityResolver};
use crate::services::Services;
use crate::telemetry::{RpcTimer, spans};
use axum::Json;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub identity: Arc<dyn IdentityResolver>,
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

pub fn router(state: AppState, with_metrics: bool) -> Router {
    let item_routes = Router::new()
        .route("/CreateIPItem", post(items::create_ip_item))
        .route("/CreateIPItems", post(items::create_ip_items))
        .route("/UpdateIPItem", post(items::update_ip_item))
        .route("/DeleteIPItem", post(items::delete_ip_item))
        .route("/DeleteIPItems", post(items::delete_ip_items))
        .route("/ListIPItemsAfterVersion", post(items::list_ip_items_after_version))
        .route("/CheckIPItemStatus", post(items::check_ip_item_status))
        .route("/FindEnabledIPItem", post(items::find_enabled_ip_item))
        .route("/ExistsEnabledIPItem", post(items::exists_enabled_ip_item))
        .route("/CountIPItemsWithListId", post(items::count_ip_items_with_list_id))
        .route("/ListIPItemsWithListId", post(items::list_ip_items_with_list_id))
        .route("/CountAllEnabledIPItems", post(items::count_all_enabled_ip_items))
        .route("/ListAllEnabledIPItems", post(items::list_all_enabled_ip_items))
        .route("/ListAllIPItemIds", post(items::list_all_ip_item_ids))
        .route("/UpdateIPItemsRead", post(items::update_ip_items_read))
        .route("/FindServerIdWithIPItemId", post(items::find_server_id_with_ip_item_id));

    let list_routes = Router::new()
        .route("/CreateIPList", post(lists::create_ip_list))
        .route("/FindEnabledIPList", post(lists::find_enabled_ip_list))
        .route("/DeleteIPList", post(lists::delete_ip_list))
        .route("/DeleteIPListsWithServerId", post(lists::delete_ip_lists_with_server_id))
        .route("/FindServerIdWithIPListId", post(lists::find_server_id_with_ip_list_id));

    let app = Router::new()
        .nest("/rpc/IPItemService", item_routes)
        .nest("/rpc/IPListService", list_routes)
        .with_state(state);

    if with_metrics {
        app.route("/metrics", get(metrics_handler))
    } else {
        app
    }
}

/// Serve the RPC surface until ctrl-c.
pub async fn serve(listen: SocketAddr, app: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listen, "RPC server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> ServiceResult<Caller> {
    let token = bearer_token(headers).ok_or(ServiceError::Unauthenticated)?;
    state.identity.resolve(token).await
}

/// Run one RPC: authenticate, time it, run `f` inside the call span and
/// count failures by error code.
pub(crate) async fn call<T, F, Fut>(
    state: &AppState,
    headers: &HeaderMap,
    method: &'static str,
    f: F,
) -> Result<Json<T>, ServiceError>
where
    T: Serialize,
    F: FnOnce(Caller) -> Fut,
    Fut: Future<Output = ServiceResult<T>>,
{
    let _timer = RpcTimer::new(method);

    let result = match authenticate(state, headers).await {
        Ok(caller) => {
            let span = spans::rpc(method, &caller.to_string());
            f(caller).instrument(span).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(value) => Ok(Json(value)),
        Err(e) => {
            metrics::record_rpc_error(method, e.error_code());
            if e.is_client_error() {
                debug!(method, code = e.error_code(), error = %e, "RPC rejected");
            } else {
                error!(method, error = %e, "RPC failed");
            }
            Err(e)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_unknown_token_is_rejected() {
        let state = test_support::state().await;
        let result = call(&state, &test_support::headers("nope"), "Test", |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(ServiceError::Unauthenticated)));

        let Json(caller) = call(&state, &test_support::headers("node-token"), "Test", |c| async move {
            Ok(c.to_string())
        })
        .await
        .unwrap();
        assert_eq!(caller, "node:3");
    }
}
