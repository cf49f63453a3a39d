//! Server Configuration
//!
//! Layered configuration: optional explicit file, `config/default`,
//! `config/local`, then `AGORA__SECTION__KEY` environment variables.
//! Every section has defaults, so an empty configuration is runnable.

use std::time::Duration;

use agora_agents::ChatOracleConfig;
use agora_api::ApiConfig;
use agora_client::PollOptions;
use agora_tasks::TaskServerConfig;
use agora_types::{Listing, ProductId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub api: ApiSettings,
    pub tasks: TaskSettings,
    pub polling: PollingSettings,
    pub oracle: OracleSettings,
    pub payment: PaymentSettings,
    pub buyer: BuyerSettings,
    pub seller: SellerSettings,
    /// Agents hosted elsewhere, reachable over HTTP
    pub peers: Vec<PeerSettings>,
    pub logging: LoggingConfig,
}

/// Server binding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// How long in-flight tasks may run after a shutdown signal
    pub shutdown_grace_secs: u64,
    /// URL other agents use to reach this server; derived from host and
    /// port when empty
    pub public_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            shutdown_grace_secs: 10,
            public_url: String::new(),
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Endpoint of a locally hosted agent as advertised to peers
    pub fn agent_endpoint(&self, agent_id: &str) -> String {
        let base = if self.public_url.is_empty() {
            let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { &self.host };
            format!("http://{}:{}", host, self.port)
        } else {
            self.public_url.trim_end_matches('/').to_string()
        };
        format!("{base}/agents/{agent_id}")
    }
}

/// Shared-secret settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub secret_header: String,
    /// Secret required on incoming requests; any non-empty value when unset
    pub secret: Option<String>,
    /// Secret sent to peers
    pub outbound_secret: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret_header: agora_api::DEFAULT_SECRET_HEADER.to_string(),
            secret: None,
            outbound_secret: "agora".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub enable_tracing: bool,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        let defaults = ApiConfig::default();
        Self {
            enable_cors: defaults.enable_cors,
            cors_origins: defaults.cors_origins,
            enable_tracing: defaults.enable_tracing,
            max_body_size: defaults.max_body_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub handler_timeout_secs: u64,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Terminal tasks older than this are purged
    pub retention_secs: u64,
    pub purge_interval_secs: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            handler_timeout_secs: 120,
            default_page_size: 20,
            max_page_size: 100,
            retention_secs: 3600,
            purge_interval_secs: 60,
        }
    }
}

impl TaskSettings {
    pub fn server_config(&self) -> TaskServerConfig {
        TaskServerConfig {
            handler_timeout: Duration::from_secs(self.handler_timeout_secs),
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_ms: u64,
    pub max_attempts: u32,
    /// Per-request timeout for remote agents
    pub request_timeout_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_attempts: 60,
            request_timeout_secs: 30,
        }
    }
}

impl PollingSettings {
    pub fn options(&self) -> PollOptions {
        PollOptions::new(Duration::from_millis(self.interval_ms), self.max_attempts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleMode {
    Deterministic,
    Chat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub mode: OracleMode,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        let chat = ChatOracleConfig::default();
        Self {
            mode: OracleMode::Deterministic,
            base_url: chat.base_url,
            model: chat.model,
            api_key: None,
            timeout_secs: chat.timeout.as_secs(),
            temperature: chat.temperature,
            max_tokens: chat.max_tokens,
        }
    }
}

impl OracleSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn chat_config(&self) -> ChatOracleConfig {
        ChatOracleConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone().filter(|k| !k.is_empty()),
            model: self.model.clone(),
            timeout: self.timeout(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentSettings {
    pub currency: String,
    /// Credited to the buyer account at startup
    pub buyer_opening_balance: f64,
    pub timeout_secs: u64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            currency: "HBAR".to_string(),
            buyer_opening_balance: 100.0,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuyerSettings {
    pub enabled: bool,
    pub agent_id: String,
    /// Account the buyer pays from
    pub account: String,
    /// Budget for purchase requests that name none
    pub default_budget: Option<f64>,
}

impl Default for BuyerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            agent_id: "buyer".to_string(),
            account: "0.0.1001".to_string(),
            default_budget: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SellerSettings {
    pub enabled: bool,
    pub agent_id: String,
    /// Settlement address published with every listing
    pub address: String,
    pub listings: Vec<ListingSettings>,
}

impl Default for SellerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            agent_id: "seller".to_string(),
            address: "0.0.4515".to_string(),
            listings: vec![ListingSettings {
                id: Some("prod_desk_lamp".to_string()),
                title: "Desk lamp".to_string(),
                description: "Brass desk lamp with a linen shade".to_string(),
                price: 9.0,
                currency: None,
                condition: "used".to_string(),
                category: "lighting".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSettings {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    /// Payment currency when unset
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default = "default_category")]
    pub category: String,
}

impl ListingSettings {
    /// Draft listing in `fallback_currency` unless one is configured
    pub fn to_listing(&self, fallback_currency: &str) -> Listing {
        let currency = self.currency.as_deref().unwrap_or(fallback_currency);
        let listing = Listing::draft(&self.title, &self.description, self.price, currency)
            .with_condition(&self.condition)
            .with_category(&self.category);
        match &self.id {
            Some(id) => listing.with_id(ProductId::from(id.as_str())),
            None => listing,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSettings {
    pub agent_id: String,
    /// Full URL of the peer's JSON-RPC endpoint
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn default_condition() -> String {
    "new".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl ServerConfig {
    /// Load configuration from environment and optional config file
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("AGORA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            enable_cors: self.api.enable_cors,
            cors_origins: self.api.cors_origins.clone(),
            enable_tracing: self.api.enable_tracing,
            secret_header: self.auth.secret_header.clone(),
            secret: self.auth.secret.clone(),
            max_body_size: self.api.max_body_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> ServerConfig {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_empty_config_is_runnable() {
        let config = from_toml("");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.oracle.mode, OracleMode::Deterministic);
        assert_eq!(config.seller.listings.len(), 1);
        assert!(config.peers.is_empty());
        assert_eq!(config.auth.secret_header, "x-agora-secret");
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = from_toml(
            r#"
            [server]
            port = 8080

            [oracle]
            mode = "chat"
            model = "gpt-4o-mini"

            [[seller.listings]]
            title = "Camera"
            price = 120.0
            currency = "USD"

            [[peers]]
            agent_id = "remote-seller"
            endpoint = "http://10.0.0.2:3000/agents/remote-seller"
            capabilities = ["sell"]
            "#,
        );

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.oracle.mode, OracleMode::Chat);
        assert_eq!(config.oracle.chat_config().model, "gpt-4o-mini");

        let listing = config.seller.listings[0].to_listing("HBAR");
        assert_eq!(listing.currency, "USD");
        assert_eq!(listing.condition, "new");
        assert_eq!(config.peers[0].capabilities, vec!["sell"]);
    }

    #[test]
    fn test_agent_endpoint() {
        let mut server = ServerSettings::default();
        assert_eq!(server.agent_endpoint("seller"), "http://127.0.0.1:3000/agents/seller");

        server.public_url = "https://agora.example.com/".to_string();
        assert_eq!(server.agent_endpoint("seller"), "https://agora.example.com/agents/seller");
    }

    #[test]
    fn test_task_settings_map_to_server_config() {
        let tasks = TaskSettings {
            handler_timeout_secs: 5,
            ..TaskSettings::default()
        };
        let server = tasks.server_config();
        assert_eq!(server.handler_timeout, Duration::from_secs(5));
        assert_eq!(server.max_page_size, 100);
    }
}
