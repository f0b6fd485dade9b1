//! Common test utilities and helpers.

#![allow(dead_code)]

use saas_api_server::{
    config::{
        AuthConfig, Config, EmailConfig, EmailProvider, LoggingConfig, MagicLinkConfig,
        RateLimitConfig, RateLimitPolicy, ServerConfig, SessionConfig, StorageConfig,
        UploadConfig, REQUIRED_POLICIES,
    },
    create_admin_router, create_public_router,
    models::{EmailMessage, User},
    services::MemoryTransport,
    AppState, Clients,
};
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener as TokioTcpListener;

/// Part size used by test servers
pub const TEST_PART_SIZE: u64 = 1024;

/// API key accepted by test servers
pub const TEST_API_KEY: &str = "test-api-key";

/// Knobs for a test server
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub rate_limit_enabled: bool,
    /// Limit of every policy when rate limiting is enabled
    pub rate_limit: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            rate_limit_enabled: false,
            rate_limit: 1000,
        }
    }
}

/// Test server instance
pub struct TestServer {
    pub public_url: String,
    pub admin_url: String,
    pub state: AppState,
    pub outbox: Arc<MemoryTransport>,
    pub data_dir: TempDir,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a test server with random ports
    pub async fn start() -> Self {
        Self::start_with(TestOptions::default()).await
    }

    /// Start a test server with custom options
    pub async fn start_with(options: TestOptions) -> Self {
        let public_port = get_available_port();
        let admin_port = get_available_port();
        let data_dir = TempDir::new().expect("Failed to create temp dir");

        let public_url = format!("http://127.0.0.1:{}", public_port);
        let admin_url = format!("http://127.0.0.1:{}", admin_port);

        let config = create_test_config(&data_dir, public_port, admin_port, &public_url, &options);
        config.validate().expect("Invalid test configuration");

        let outbox = Arc::new(MemoryTransport::new());
        let mut clients = Clients::from_config(&config)
            .await
            .expect("Failed to create clients");
        clients.email = outbox.clone();

        let state = AppState::with_clients(config, clients).expect("Failed to create app state");

        let public_app = create_public_router(state.clone());
        let admin_app = create_admin_router(state.clone());

        let public_listener = TokioTcpListener::bind(("127.0.0.1", public_port))
            .await
            .expect("Failed to bind public listener");
        let admin_listener = TokioTcpListener::bind(("127.0.0.1", admin_port))
            .await
            .expect("Failed to bind admin listener");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        // Start servers in background
        tokio::spawn(async move {
            tokio::select! {
                _ = axum::serve(
                    public_listener,
                    public_app.into_make_service_with_connect_info::<SocketAddr>(),
                ) => {}
                _ = axum::serve(admin_listener, admin_app) => {}
                _ = shutdown_rx => {}
            }
        });

        // Give servers time to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            public_url,
            admin_url,
            state,
            outbox,
            data_dir,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get HTTP client
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap()
    }

    /// Get public URL
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.public_url, path)
    }

    /// Get admin URL
    pub fn admin(&self, path: &str) -> String {
        format!("{}{}", self.admin_url, path)
    }

    /// Create a user with a session directly, returning the user and raw token
    pub fn sign_in(&self, email: &str) -> (User, String) {
        let user = User::new(email);
        self.state.db.insert_user(&user).unwrap();
        let (token, _) = self.state.sessions.create(user.id).unwrap();
        (user, token.as_str().to_string())
    }

    /// Wait until at least `count` emails were delivered
    pub async fn wait_for_emails(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..100 {
            let messages = self.outbox.messages();
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.outbox.messages()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// `Cookie` header value for a session token
pub fn session_cookie(token: &str) -> String {
    format!("session={}", token)
}

/// Extract the login token from a magic link email
pub fn token_from_email(message: &EmailMessage) -> String {
    message
        .text
        .split("token=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .expect("No token in email")
        .to_string()
}

/// Create test configuration
fn create_test_config(
    data_dir: &TempDir,
    public_port: u16,
    admin_port: u16,
    base_url: &str,
    options: &TestOptions,
) -> Config {
    let policies: HashMap<String, RateLimitPolicy> = REQUIRED_POLICIES
        .iter()
        .map(|name| {
            (
                name.to_string(),
                RateLimitPolicy {
                    limit: options.rate_limit,
                    window_seconds: 60,
                },
            )
        })
        .collect();

    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: public_port,
            admin_host: "127.0.0.1".to_string(),
            admin_port,
            base_url: base_url.to_string(),
            production: false,
            max_body_size: 64 * 1024,
            cleanup_interval_seconds: 60,
            trust_forwarded_headers: true,
        },
        storage: StorageConfig {
            data_dir: data_dir.path().to_path_buf(),
            objects_dir: "objects".to_string(),
            temp_dir: "temp".to_string(),
            directory_levels: 2,
            signing_secret: "integration-test-secret".to_string(),
            presign_ttl_seconds: 300,
        },
        session: SessionConfig::default(),
        magic_link: MagicLinkConfig::default(),
        upload: UploadConfig {
            max_file_size: 1024 * 1024,
            part_size: TEST_PART_SIZE,
            allowed_content_types: vec![
                "image/png".to_string(),
                "image/jpeg".to_string(),
                "application/pdf".to_string(),
            ],
            upload_session_timeout: 300,
        },
        rate_limit: RateLimitConfig {
            enabled: options.rate_limit_enabled,
            policies,
        },
        email: EmailConfig {
            provider: EmailProvider::Log,
            api_url: String::new(),
            api_key: String::new(),
            from: "noreply@example.com".to_string(),
            max_attempts: 2,
            backoff_ms: 1,
            timeout_seconds: 5,
        },
        logging: LoggingConfig {
            level: "warn".to_string(),
            format: "pretty".to_string(),
        },
        auth: AuthConfig {
            api_keys: vec![TEST_API_KEY.to_string()],
        },
    }
}

/// Find an available TCP port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}
