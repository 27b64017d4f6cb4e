//! `KeyProvider`: ES256 signing/verification key material.

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey};
use p256::elliptic_curve::pkcs8::LineEnding;
use p256::{PublicKey, SecretKey};
use par_receipt::{JwksError, JwksResolver};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors raised while constructing a [`KeyProvider`].
#[derive(Debug, Error)]
pub enum KeyProviderError {
    /// The supplied JWK could not be parsed as a P-256 key.
    #[error("invalid JWK: {0}")]
    InvalidJwk(String),
    /// A parsed key could not be converted to PEM, or PEM could not be
    /// loaded by the JOSE library.
    #[error("key conversion failed: {0}")]
    Conversion(String),
}

/// Returns `{private_jwk, public_jwk, kid}` plus ready-to-use JOSE keys.
///
/// In production this is backed by configuration (see
/// [`ConfigKeyProvider`]); in development an ephemeral keypair may be
/// generated at startup (see [`DevKeyProvider`]). Implementations must
/// never log private key material — only [`KeyProvider::public_jwk`] is
/// safe to include in logs.
pub trait KeyProvider: Send + Sync {
    /// The key used to sign new receipts.
    fn encoding_key(&self) -> &EncodingKey;
    /// The key used to verify receipt signatures.
    fn decoding_key(&self) -> &DecodingKey;
    /// The `kid` advertised in the protected header of signed receipts.
    fn kid(&self) -> &str;
    /// The public key in JWK form, safe to log or serve.
    fn public_jwk(&self) -> &Value;
}

fn jose_keys_from_secret(secret: &SecretKey) -> Result<(EncodingKey, DecodingKey), KeyProviderError> {
    let private_pem = secret
        .to_sec1_pem(LineEnding::LF)
        .map_err(|e| KeyProviderError::Conversion(e.to_string()))?;
    let public_pem = secret
        .public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeyProviderError::Conversion(e.to_string()))?;
    let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
        .map_err(|e| KeyProviderError::Conversion(e.to_string()))?;
    let decoding_key = DecodingKey::from_ec_pem(public_pem.as_bytes())
        .map_err(|e| KeyProviderError::Conversion(e.to_string()))?;
    Ok((encoding_key, decoding_key))
}

/// A development-only [`KeyProvider`] that generates an ephemeral ES256
/// keypair at construction time. Only the public JWK is ever logged.
pub struct DevKeyProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    kid: String,
    public_jwk: Value,
}

impl DevKeyProvider {
    /// Generates a fresh in-memory keypair. Logs the public JWK (never the
    /// private key) at `info` level.
    pub fn generate() -> Result<Self, KeyProviderError> {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        let (encoding_key, decoding_key) = jose_keys_from_secret(&secret)?;
        let kid = format!("dev-{}", Uuid::new_v4());
        let jwk = secret.public_key().to_jwk();
        let public_jwk =
            serde_json::to_value(&jwk).map_err(|e| KeyProviderError::Conversion(e.to_string()))?;
        tracing::info!(kid = %kid, public_jwk = %public_jwk, "generated ephemeral development signing key");
        Ok(Self {
            encoding_key,
            decoding_key,
            kid,
            public_jwk,
        })
    }
}

impl KeyProvider for DevKeyProvider {
    fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
    fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
    fn kid(&self) -> &str {
        &self.kid
    }
    fn public_jwk(&self) -> &Value {
        &self.public_jwk
    }
}

/// A [`KeyProvider`] backed by configuration-supplied JWKs
/// (`RECEIPT_VERIFIER_PRIVATE_JWK` / `RECEIPT_VERIFIER_PUBLIC_JWK`).
pub struct ConfigKeyProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    kid: String,
    public_jwk: Value,
}

impl ConfigKeyProvider {
    /// Parses `private_jwk_json` and `public_jwk_json` as P-256 JWKs and
    /// derives the PEM-encoded keys the JOSE layer needs.
    ///
    /// # Errors
    ///
    /// Returns [`KeyProviderError::InvalidJwk`] if either JWK fails to
    /// parse, or [`KeyProviderError::Conversion`] if PEM derivation fails.
    pub fn from_jwk(private_jwk_json: &str, public_jwk_json: &str, kid: String) -> Result<Self, KeyProviderError> {
        let secret = SecretKey::from_jwk_str(private_jwk_json)
            .map_err(|e| KeyProviderError::InvalidJwk(e.to_string()))?;
        let public = PublicKey::from_jwk_str(public_jwk_json)
            .map_err(|e| KeyProviderError::InvalidJwk(e.to_string()))?;
        if public != secret.public_key() {
            return Err(KeyProviderError::InvalidJwk(
                "public JWK does not match private JWK".to_string(),
            ));
        }
        let (encoding_key, decoding_key) = jose_keys_from_secret(&secret)?;
        let jwk = public.to_jwk();
        let public_jwk =
            serde_json::to_value(&jwk).map_err(|e| KeyProviderError::Conversion(e.to_string()))?;
        Ok(Self {
            encoding_key,
            decoding_key,
            kid,
            public_jwk,
        })
    }
}

impl KeyProvider for ConfigKeyProvider {
    fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
    fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
    fn kid(&self) -> &str {
        &self.kid
    }
    fn public_jwk(&self) -> &Value {
        &self.public_jwk
    }
}

/// A [`JwksResolver`] that fetches a JWKS document over HTTP and caches the
/// parsed [`DecodingKey`] for each `kid`, refetching only on a cache miss.
pub struct JwksKeyProvider {
    jwks_url: String,
    http: reqwest::Client,
    cache: RwLock<HashMap<String, DecodingKey>>,
}

impl JwksKeyProvider {
    /// Builds a resolver against `jwks_url`, using `http` for fetches.
    pub fn new(jwks_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches the JWKS document and parses every entry's `kid` into a
    /// [`DecodingKey`], replacing the cache wholesale.
    async fn refresh(&self) -> Result<(), JwksError> {
        let body: JwksDocument = self
            .http
            .get(&self.jwks_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        let mut parsed = HashMap::new();
        for key in body.keys {
            let kid = key
                .get("kid")
                .and_then(Value::as_str)
                .ok_or_else(|| JwksError::Malformed("jwks entry missing kid".to_string()))?
                .to_string();
            let mut key_material = key.clone();
            if let Some(obj) = key_material.as_object_mut() {
                obj.remove("kid");
            }
            let jwk_json = serde_json::to_string(&key_material)
                .map_err(|e| JwksError::Malformed(e.to_string()))?;
            let public = PublicKey::from_jwk_str(&jwk_json)
                .map_err(|e| JwksError::Malformed(e.to_string()))?;
            let pem = public
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| JwksError::Malformed(e.to_string()))?;
            let decoding_key = DecodingKey::from_ec_pem(pem.as_bytes())
                .map_err(|e| JwksError::Malformed(e.to_string()))?;
            parsed.insert(kid, decoding_key);
        }

        *self.cache.write().await = parsed;
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
struct JwksDocument {
    keys: Vec<Value>,
}

#[async_trait]
impl JwksResolver for JwksKeyProvider {
    async fn resolve(&self, kid: &str) -> Result<DecodingKey, JwksError> {
        if let Some(key) = self.cache.read().await.get(kid) {
            return Ok(key.clone());
        }
        self.refresh().await?;
        self.cache
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| JwksError::UnknownKid(kid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_key_provider_generates_usable_keys() {
        let provider = DevKeyProvider::generate().unwrap();
        assert!(provider.kid().starts_with("dev-"));
        assert!(provider.public_jwk().get("crv").is_some());
    }

    #[test]
    fn config_key_provider_round_trips_through_jwk() {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        let private_jwk = secret.to_jwk_string();
        let public_jwk = secret.public_key().to_jwk_string();
        let provider = ConfigKeyProvider::from_jwk(&private_jwk, &public_jwk, "kid-1".into()).unwrap();
        assert_eq!(provider.kid(), "kid-1");
    }

    #[test]
    fn config_key_provider_rejects_mismatched_keypair() {
        let secret_a = SecretKey::random(&mut rand::rngs::OsRng);
        let secret_b = SecretKey::random(&mut rand::rngs::OsRng);
        let private_jwk = secret_a.to_jwk_string();
        let public_jwk = secret_b.public_key().to_jwk_string();
        let result = ConfigKeyProvider::from_jwk(&private_jwk, &public_jwk, "kid-1".into());
        assert!(matches!(result, Err(KeyProviderError::InvalidJwk(_))));
    }

    #[tokio::test]
    async fn jwks_key_provider_resolves_and_caches_by_kid() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        let mut jwk = serde_json::to_value(secret.public_key().to_jwk()).unwrap();
        jwk.as_object_mut().unwrap().insert("kid".into(), Value::String("kid-1".into()));

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "keys": [jwk] })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let provider = JwksKeyProvider::new(format!("{}/jwks.json", server.uri()), reqwest::Client::new());
        let key = provider.resolve("kid-1").await.unwrap();
        drop(key);
        // Second resolve for the same kid must hit the cache, not the
        // mock server (which only answers once).
        let cached = provider.resolve("kid-1").await;
        assert!(cached.is_ok());
    }

    #[tokio::test]
    async fn jwks_key_provider_rejects_an_unknown_kid() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "keys": [] })))
            .mount(&server)
            .await;

        let provider = JwksKeyProvider::new(format!("{}/jwks.json", server.uri()), reqwest::Client::new());
        let err = provider.resolve("missing-kid").await.unwrap_err();
        assert!(matches!(err, JwksError::UnknownKid(_)));
    }
}
