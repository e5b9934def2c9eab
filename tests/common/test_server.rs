use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use elroi::auth::PasswordHasher;
use elroi::config::ServerConfig;
use elroi::rbac::ProtectedEntities;
use elroi::rbac::catalog::{bootstrap_root_user, seed};
use elroi::server::{AppState, create_router};
use elroi::store::{SqliteStore, Store};
use elroi::types::NewUser;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const ROOT_PASSWORD: &str = "root-password";
pub const USER_PASSWORD: &str = "user-password";

/// An in-process server on an ephemeral port, backed by a fresh data dir
/// with the seeded catalog and a root user (`root`, id 1).
pub struct TestServer {
    pub temp_dir: TempDir,
    pub base_url: String,
    pub client: reqwest::Client,
    pub store: Arc<dyn Store>,
    server_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");

        let mut config = ServerConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        configure(&mut config);

        let store = SqliteStore::new(config.db_path()).expect("open store");
        store.initialize().expect("initialize schema");
        let protected = ProtectedEntities::default();
        seed(&store, &config.default_guard, &protected).expect("seed catalog");
        bootstrap_root_user(
            &store,
            &NewUser {
                name: "Root".to_string(),
                username: "root".to_string(),
                email: "root@test.dev".to_string(),
                password_hash: PasswordHasher::new().hash(ROOT_PASSWORD).expect("hash"),
                email_verified_at: Some(Utc::now()),
            },
            &config.default_guard,
            &protected,
        )
        .expect("bootstrap root user");

        let store: Arc<dyn Store> = Arc::new(store);
        let state = Arc::new(AppState::new(store.clone(), config));
        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        let base_url = format!("http://127.0.0.1:{}", port);
        let client = reqwest::Client::new();
        Self::wait_for_ready(&client, &base_url).await;

        Self {
            temp_dir,
            base_url,
            client,
            store,
            server_task,
        }
    }

    async fn wait_for_ready(client: &reqwest::Client, base_url: &str) {
        for _ in 0..50 {
            if client
                .get(format!("{}/health", base_url))
                .send()
                .await
                .is_ok()
            {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("Server did not become ready");
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Logs in and returns the session token.
    pub async fn login(&self, login: &str, password: &str) -> String {
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "login": login, "password": password }))
            .send()
            .await
            .expect("login request");
        assert_eq!(resp.status(), 200, "login failed for {login}");
        let body: Value = resp.json().await.expect("login body");
        body["data"]["token"]
            .as_str()
            .expect("token in login response")
            .to_string()
    }

    pub async fn root_token(&self) -> String {
        self.login("root", ROOT_PASSWORD).await
    }

    /// Creates a verified user holding `roles` (by id) through the admin API
    /// and returns `(user_id, token)`.
    pub async fn create_user(&self, root_token: &str, username: &str, roles: &[i64]) -> (i64, String) {
        let resp = self
            .client
            .post(self.url("/admin/users"))
            .bearer_auth(root_token)
            .json(&json!({
                "name": username,
                "username": username,
                "email": format!("{username}@test.dev"),
                "password": USER_PASSWORD,
                "verified": true,
                "roles": roles,
            }))
            .send()
            .await
            .expect("create user request");
        assert_eq!(resp.status(), 201, "create user {username}");
        let body: Value = resp.json().await.expect("create user body");
        let id = body["data"]["id"].as_i64().expect("user id");

        let token = self.login(username, USER_PASSWORD).await;
        (id, token)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}
