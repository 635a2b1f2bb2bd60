//! Test server management.
//!
//! Spawns and manages edgelistd instances for integration testing.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tokio::time::sleep;

pub const ADMIN_TOKEN: &str = "admin-secret";
pub const USER_TOKEN: &str = "user-secret";
pub const NODE_TOKEN: &str = "node-secret";

/// A test server instance.
pub struct TestServer {
    child: Child,
    port: u16,
    data_dir: PathBuf,
}

impl TestServer {
    /// Spawn a new test server listening on `port`.
    pub async fn spawn(port: u16) -> anyhow::Result<Self> {
        // Create temporary directory for test data
        let data_dir = std::env::temp_dir().join(format!("edgelist-test-{}", port));
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join("edgelist.toml");
        let config_content = format!(
            r#"
[server]
name = "test.edgelist"
listen = "127.0.0.1:{}"
metrics = true

[database]
path = "{}/test.db"

[sync]
default_page_size = 50
max_page_size = 200

[[token]]
token = "{}"
kind = "admin"
id = 1

[[token]]
token = "{}"
kind = "user"
id = 5

[[token]]
token = "{}"
kind = "node"
id = 3
"#,
            port,
            data_dir.display(),
            ADMIN_TOKEN,
            USER_TOKEN,
            NODE_TOKEN,
        );

        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_edgelistd"))
            .arg(&config_path)
            .env("RUST_LOG", "warn")
            .spawn()?;

        let server = Self {
            child,
            port,
            data_dir,
        };

        // Wait for server to start listening
        server.wait_until_ready().await?;

        Ok(server)
    }

    /// Wait until the server is accepting connections.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Server failed to start within 5 seconds")
    }

    /// Get the server address.
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Create a client that authenticates with `token`.
    pub fn client(&self, token: &str) -> super::client::TestClient {
        super::client::TestClient::new(&self.address(), token)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Kill the server process
        let _ = self.child.kill();
        let _ = self.child.wait();

        // Clean up test data directory
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}
