use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use service_core::observability::TracedClientExt;

#[derive(Debug, thiserror::Error)]
pub enum KeySourceError {
    #[error("no signing key matches kid {0:?}")]
    UnknownKey(Option<String>),

    #[error("signing keys unavailable: {0}")]
    Unavailable(String),
}

/// Source of public keys for verifying bearer-token signatures.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, KeySourceError>;
}

/// Keys fetched from the issuer's JWKS document, cached for the process lifetime.
pub struct JwksKeySource {
    http: reqwest::Client,
    url: String,
    keys: DashMap<String, DecodingKey>,
}

impl JwksKeySource {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            keys: DashMap::new(),
        }
    }

    async fn refresh(&self) -> Result<(), KeySourceError> {
        tracing::info!(url = %self.url, "Refreshing issuer signing keys");

        let response = self
            .http
            .traced_get(&self.url)
            .send()
            .await
            .map_err(|e| KeySourceError::Unavailable(e.without_url().to_string()))?;
        if !response.status().is_success() {
            return Err(KeySourceError::Unavailable(format!(
                "JWKS endpoint returned {}",
                response.status()
            )));
        }

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| KeySourceError::Unavailable(e.without_url().to_string()))?;

        for jwk in &set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    self.keys.insert(kid, key);
                }
                Err(e) => tracing::warn!(kid = %kid, error = %e, "Skipping unusable JWK"),
            }
        }
        Ok(())
    }

    fn cached(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.get(kid).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl KeySource for JwksKeySource {
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, KeySourceError> {
        let kid = kid.ok_or(KeySourceError::UnknownKey(None))?;

        if let Some(key) = self.cached(kid) {
            return Ok(key);
        }

        self.refresh().await?;
        self.cached(kid)
            .ok_or_else(|| KeySourceError::UnknownKey(Some(kid.to_string())))
    }
}

/// A single pinned key, used regardless of `kid`.
pub struct StaticKeySource {
    key: DecodingKey,
}

impl StaticKeySource {
    pub fn new(key: DecodingKey) -> Self {
        Self { key }
    }

    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, anyhow::Error> {
        Ok(Self::new(DecodingKey::from_rsa_pem(pem)?))
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn decoding_key(&self, _kid: Option<&str>) -> Result<DecodingKey, KeySourceError> {
        Ok(self.key.clone())
    }
}
