use std::path::PathBuf;
use std::time::Duration;

/// Which identity provider verifies bearer tokens. Picked once at startup;
/// there is no per-request provider dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProviderKind {
    Keycloak,
    Okta,
    Static,
}

impl AuthProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "keycloak" => Some(AuthProviderKind::Keycloak),
            "okta" => Some(AuthProviderKind::Okta),
            "static" => Some(AuthProviderKind::Static),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub database_path: PathBuf,
    pub playbooks_dir: PathBuf,

    pub auth_provider: AuthProviderKind,
    pub keycloak_url: String,
    pub keycloak_realm: String,
    pub keycloak_client_id: String,
    pub okta_issuer: String,
    pub okta_client_id: String,
    /// Tokens accepted by the static provider, as `token=user` pairs
    /// separated by commas. Dev/test only.
    pub static_tokens: String,

    pub vault_addr: String,
    pub vault_mount: String,
    pub vault_token_file: Option<PathBuf>,
    pub vault_token: Option<String>,

    pub inventory_api_url: String,
    pub inventory_timeout: Duration,

    pub lock_wait: Duration,
    pub lock_ttl: Duration,

    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,

    pub log_level: String,
    pub production: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let provider_raw = env_or("AUTH_PROVIDER", "keycloak");
        let auth_provider = AuthProviderKind::parse(&provider_raw)
            .ok_or_else(|| anyhow::anyhow!("Unsupported auth provider: {}", provider_raw))?;

        Ok(Self {
            api_host: env_or("API_HOST", "0.0.0.0"),
            api_port: env_parsed("API_PORT", 8080),
            database_path: PathBuf::from(env_or("DATABASE_PATH", "pxbackup.db")),
            playbooks_dir: PathBuf::from(env_or("PLAYBOOKS_DIR", "/playbooks")),

            auth_provider,
            keycloak_url: env_or("KEYCLOAK_URL", "http://localhost:8081"),
            keycloak_realm: env_or("KEYCLOAK_REALM", "pxbackup"),
            keycloak_client_id: env_or("KEYCLOAK_CLIENT_ID", "pxbackup-runner"),
            okta_issuer: env_or("OKTA_ISSUER", "https://test-issuer.okta.com"),
            okta_client_id: env_or("OKTA_CLIENT_ID", "test-client-id"),
            static_tokens: env_or("STATIC_AUTH_TOKENS", ""),

            vault_addr: env_or("VAULT_ADDR", "http://localhost:8200"),
            vault_mount: env_or("VAULT_MOUNT", "secret"),
            vault_token_file: std::env::var("VAULT_TOKEN_FILE").ok().map(PathBuf::from),
            vault_token: std::env::var("VAULT_TOKEN").ok(),

            inventory_api_url: env_or("INVENTORY_API_URL", "http://localhost:9000"),
            inventory_timeout: Duration::from_secs(env_parsed("INVENTORY_TIMEOUT_SECS", 30)),

            lock_wait: Duration::from_secs(env_parsed("LOCK_WAIT_SECS", 10)),
            lock_ttl: Duration::from_secs(env_parsed("LOCK_TTL_SECS", 600)),

            rate_limit_per_second: env_parsed("RATE_LIMIT_PER_SECOND", 2),
            rate_limit_burst: env_parsed("RATE_LIMIT_BURST", 10),

            log_level: env_or("LOG_LEVEL", "info"),
            production: env_or("APP_ENV", "development") == "production",
        })
    }
}
