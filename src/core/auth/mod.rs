use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{AuthProviderKind, Config};
use crate::core::error::ApiError;

/// Identity extracted from a verified bearer token.
#[derive(Debug, Clone)]
pub struct Claims {
    pub user_id: String,
}

/// Closed set of identity providers. The variant is chosen once at startup
/// from configuration; every request goes through the same provider.
pub enum IdentityVerifier {
    Keycloak(OidcValidator),
    Okta(OidcValidator),
    /// Fixed token-to-user mapping for tests and local development.
    Static(StaticVerifier),
}

impl IdentityVerifier {
    pub fn from_config(config: &Config) -> Self {
        match config.auth_provider {
            AuthProviderKind::Keycloak => {
                let issuer = format!(
                    "{}/realms/{}",
                    config.keycloak_url.trim_end_matches('/'),
                    config.keycloak_realm
                );
                info!(issuer = %issuer, "Using Keycloak identity provider");
                IdentityVerifier::Keycloak(OidcValidator::new(
                    issuer,
                    config.keycloak_client_id.clone(),
                ))
            }
            AuthProviderKind::Okta => {
                info!(issuer = %config.okta_issuer, "Using Okta identity provider");
                IdentityVerifier::Okta(OidcValidator::new(
                    config.okta_issuer.clone(),
                    config.okta_client_id.clone(),
                ))
            }
            AuthProviderKind::Static => {
                IdentityVerifier::Static(StaticVerifier::parse(&config.static_tokens))
            }
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        match self {
            IdentityVerifier::Keycloak(v) | IdentityVerifier::Okta(v) => v.verify(token).await,
            IdentityVerifier::Static(v) => v.verify(token),
        }
    }

    /// Provider reachability for the health endpoint.
    pub async fn health(&self) -> Result<(), String> {
        match self {
            IdentityVerifier::Keycloak(v) | IdentityVerifier::Okta(v) => v.health().await,
            IdentityVerifier::Static(_) => Ok(()),
        }
    }
}

pub struct StaticVerifier {
    tokens: HashMap<String, String>,
}

impl StaticVerifier {
    /// Parses `token=user` pairs separated by commas.
    pub fn parse(raw: &str) -> Self {
        let tokens = raw
            .split(',')
            .filter_map(|pair| {
                let (token, user) = pair.split_once('=')?;
                if token.is_empty() || user.is_empty() {
                    return None;
                }
                Some((token.trim().to_string(), user.trim().to_string()))
            })
            .collect();
        Self { tokens }
    }

    pub fn single(token: &str, user: &str) -> Self {
        Self {
            tokens: HashMap::from([(token.to_string(), user.to_string())]),
        }
    }

    fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        match self.tokens.get(token) {
            Some(user_id) => Ok(Claims {
                user_id: user_id.clone(),
            }),
            None => Err(ApiError::Authentication("Invalid token".to_string())),
        }
    }
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    last_refresh: Instant,
}

#[derive(Debug, serde::Deserialize)]
struct OidcDiscovery {
    issuer: String,
    jwks_uri: String,
}

#[derive(Debug, serde::Deserialize)]
struct JwksDocument {
    keys: Vec<JwkKey>,
}

#[derive(Debug, serde::Deserialize)]
struct JwkKey {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct TokenClaims {
    sub: Option<String>,
}

const JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

/// Verifies RS256 bearer tokens against a provider's JWKS, resolved through
/// OIDC discovery and cached between refreshes.
pub struct OidcValidator {
    issuer: String,
    audience: String,
    jwks_cache: Arc<RwLock<Option<JwksCache>>>,
    http: reqwest::Client,
}

impl OidcValidator {
    pub fn new(issuer: String, audience: String) -> Self {
        Self {
            issuer,
            audience,
            jwks_cache: Arc::new(RwLock::new(None)),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let header = decode_header(token).map_err(|e| ApiError::Authentication(e.to_string()))?;

        let key = self.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| ApiError::Authentication(e.to_string()))?;

        let user_id = data
            .claims
            .sub
            .ok_or_else(|| ApiError::Authentication("Token does not contain user ID".to_string()))?;
        debug!(user_id = %user_id, "Verified bearer token");
        Ok(Claims { user_id })
    }

    pub async fn health(&self) -> Result<(), String> {
        self.fetch_discovery()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, ApiError> {
        let stale = {
            let cache = self.jwks_cache.read().await;
            match &*cache {
                None => true,
                Some(c) => c.last_refresh.elapsed() > JWKS_REFRESH_INTERVAL,
            }
        };
        if stale {
            self.refresh_jwks().await?;
        }

        let cache = self.jwks_cache.read().await;
        let cache = cache
            .as_ref()
            .ok_or_else(|| ApiError::Authentication("Signing keys unavailable".to_string()))?;
        let key = match kid {
            Some(kid) => cache.keys.get(kid).cloned(),
            None => cache.keys.values().next().cloned(),
        };
        key.ok_or_else(|| ApiError::Authentication("Signing key not found".to_string()))
    }

    async fn fetch_discovery(&self) -> Result<OidcDiscovery, ApiError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            self.issuer.trim_end_matches('/')
        );
        let discovery: OidcDiscovery = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Authentication(e.to_string()))?
            .json()
            .await
            .map_err(|e| ApiError::Authentication(e.to_string()))?;

        if discovery.issuer.trim_end_matches('/') != self.issuer.trim_end_matches('/') {
            return Err(ApiError::Authentication(format!(
                "Issuer mismatch: expected {}, got {}",
                self.issuer, discovery.issuer
            )));
        }
        Ok(discovery)
    }

    async fn refresh_jwks(&self) -> Result<(), ApiError> {
        let discovery = self.fetch_discovery().await?;

        let jwks: JwksDocument = self
            .http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| ApiError::Authentication(e.to_string()))?
            .json()
            .await
            .map_err(|e| ApiError::Authentication(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                continue;
            };
            let key = DecodingKey::from_rsa_components(n, e)
                .map_err(|e| ApiError::Authentication(e.to_string()))?;
            keys.insert(jwk.kid.unwrap_or_else(|| "default".to_string()), key);
        }
        if keys.is_empty() {
            return Err(ApiError::Authentication(
                "No usable signing keys in JWKS".to_string(),
            ));
        }

        info!(key_count = keys.len(), "Refreshed JWKS cache");
        let mut cache = self.jwks_cache.write().await;
        *cache = Some(JwksCache {
            keys,
            last_refresh: Instant::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_verifier_accepts_known_token() {
        let verifier = IdentityVerifier::Static(StaticVerifier::single("sekrit", "alice"));
        let claims = verifier.verify("sekrit").await.unwrap();
        assert_eq!(claims.user_id, "alice");
    }

    #[tokio::test]
    async fn static_verifier_rejects_unknown_token() {
        let verifier = IdentityVerifier::Static(StaticVerifier::single("sekrit", "alice"));
        let err = verifier.verify("wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }

    #[test]
    fn static_verifier_parses_token_pairs() {
        let v = StaticVerifier::parse("t1=alice,t2=bob");
        assert_eq!(v.verify("t1").unwrap().user_id, "alice");
        assert_eq!(v.verify("t2").unwrap().user_id, "bob");
        assert!(v.verify("t3").is_err());
    }

    #[test]
    fn static_verifier_ignores_malformed_pairs() {
        let v = StaticVerifier::parse("t1=alice,,=nobody,bare");
        assert_eq!(v.verify("t1").unwrap().user_id, "alice");
        assert!(v.verify("bare").is_err());
    }

    #[tokio::test]
    async fn garbage_jwt_is_rejected_before_any_network_call() {
        let validator =
            OidcValidator::new("https://idp.example.com".to_string(), "client".to_string());
        let err = validator.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }
}
