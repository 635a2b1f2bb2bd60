//! Test RPC client.
//!
//! Calls the JSON RPC surface with one bearer token and reads back status
//! and body.

use serde_json::Value;
use std::time::Duration;

/// Per-request timeout for test calls.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A response from the server.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    /// Parse the body as JSON.
    pub fn json(&self) -> anyhow::Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// A test RPC client bound to one bearer token.
pub struct TestClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl TestClient {
    pub fn new(address: &str, token: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: format!("http://{}", address),
            token: token.to_string(),
            http,
        }
    }

    /// Call `POST /rpc/<service>/<method>` with a JSON body.
    pub async fn call(&self, service: &str, method: &str, body: Value) -> anyhow::Result<Reply> {
        let url = format!("{}/rpc/{}/{}", self.base_url, service, method);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Self::reply(response).await
    }

    /// Call an item service method and expect a 200 with a JSON body.
    pub async fn item(&self, method: &str, body: Value) -> anyhow::Result<Value> {
        self.ok("IPItemService", method, body).await
    }

    /// Call a list service method and expect a 200 with a JSON body.
    pub async fn list(&self, method: &str, body: Value) -> anyhow::Result<Value> {
        self.ok("IPListService", method, body).await
    }

    async fn ok(&self, service: &str, method: &str, body: Value) -> anyhow::Result<Value> {
        let reply = self.call(service, method, body).await?;
        if reply.status != 200 {
            anyhow::bail!("{} returned {}: {}", method, reply.status, reply.body);
        }
        reply.json()
    }

    /// `GET /metrics`.
    pub async fn metrics(&self) -> anyhow::Result<Reply> {
        let response = self
            .http
            .get(format!("{}/metrics", self.base_url))
            .send()
            .await?;
        Self::reply(response).await
    }

    async fn reply(response: reqwest::Response) -> anyhow::Result<Reply> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(Reply { status, body })
    }
}
