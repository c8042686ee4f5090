use base64::{engine::general_purpose::URL_SAFE, Engine};
use jsonwebtoken::{Algorithm, Validation};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::sync::Arc;

use crate::clients::{KeySource, KeySourceError};
use crate::models::{AuthStrategy, VerifiedIdentity};
use crate::services::error::ProxyError;

const ACCESS_TOKEN_USE: &str = "access";

#[derive(Debug, Deserialize)]
struct AccessClaims {
    exp: Option<i64>,
    iss: Option<String>,
    token_use: Option<String>,
    client_id: Option<String>,
    sub: Option<String>,
    username: Option<String>,
    scope: Option<String>,
    #[serde(rename = "cognito:groups", default)]
    groups: Vec<String>,
}

/// Extract the token from an `Authorization` header value.
pub fn parse_authorization(header: Option<&str>) -> Result<Secret<String>, ProxyError> {
    let value = header.ok_or(ProxyError::MissingBearer)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(ProxyError::MissingBearer)?
        .trim();
    if token.is_empty() {
        return Err(ProxyError::MissingAccessToken);
    }
    Ok(Secret::new(token.to_string()))
}

/// Decode one base64url JWT segment, restoring stripped `=` padding.
fn decode_segment(segment: &str) -> Result<Vec<u8>, ProxyError> {
    let mut padded = segment.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    URL_SAFE.decode(padded).map_err(|_| ProxyError::InvalidToken)
}

pub struct BearerVerifier {
    keys: Arc<dyn KeySource>,
    issuer: String,
}

impl BearerVerifier {
    pub fn new(keys: Arc<dyn KeySource>, issuer: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
        }
    }

    pub async fn verify(&self, token: &Secret<String>) -> Result<VerifiedIdentity, ProxyError> {
        let token = token.expose_secret();

        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(ProxyError::InvalidToken);
        }

        let header = jsonwebtoken::decode_header(token).map_err(|_| ProxyError::InvalidToken)?;
        if header.alg != Algorithm::RS256 {
            tracing::warn!(alg = ?header.alg, "Rejecting token with unexpected algorithm");
            return Err(ProxyError::InvalidToken);
        }

        let claims: AccessClaims = serde_json::from_slice(&decode_segment(segments[1])?)
            .map_err(|_| ProxyError::InvalidToken)?;
        self.check_claims(&claims)?;

        let key = self
            .keys
            .decoding_key(header.kid.as_deref())
            .await
            .map_err(|e| match e {
                KeySourceError::UnknownKey(kid) => {
                    tracing::warn!(kid = ?kid, "Token signed with unknown key");
                    ProxyError::InvalidToken
                }
                KeySourceError::Unavailable(reason) => ProxyError::KeysUnavailable(reason),
            })?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.validate_aud = false;
        validation.leeway = 0;

        jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation).map_err(|e| {
            tracing::warn!(error = %e, "Token signature verification failed");
            ProxyError::InvalidToken
        })?;

        let client_id = claims
            .client_id
            .or(claims.sub)
            .ok_or(ProxyError::InvalidToken)?;
        let scopes = claims
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let principal = claims.username.unwrap_or_else(|| client_id.clone());
        let mut identity = VerifiedIdentity::new(AuthStrategy::ClientCredentials, principal)
            .with_client(client_id, scopes)
            .with_groups(claims.groups);
        identity.token_use = claims.token_use;

        tracing::info!(
            client_id = identity.client_id.as_deref().unwrap_or_default(),
            scopes = ?identity.scopes,
            "Bearer token verified"
        );
        Ok(identity)
    }

    fn check_claims(&self, claims: &AccessClaims) -> Result<(), ProxyError> {
        self.check_claims_at(claims, chrono::Utc::now().timestamp())
    }

    /// A token is valid strictly before its `exp` second.
    fn check_claims_at(&self, claims: &AccessClaims, now: i64) -> Result<(), ProxyError> {
        match claims.exp {
            Some(exp) if now < exp => {}
            _ => {
                tracing::info!(exp = ?claims.exp, "Token expired");
                return Err(ProxyError::InvalidToken);
            }
        }

        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            tracing::warn!(iss = ?claims.iss, "Token issuer mismatch");
            return Err(ProxyError::InvalidToken);
        }

        if claims.token_use.as_deref() != Some(ACCESS_TOKEN_USE) {
            return Err(ProxyError::WrongTokenUse);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::StaticKeySource;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const ISSUER: &str = "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_TestPool";
    const SIGNING_KEY: &str = include_str!("../../../tests/fixtures/jwt_signing_key.pem");
    const VERIFYING_KEY: &str = include_str!("../../../tests/fixtures/jwt_verifying_key.pem");
    const FOREIGN_KEY: &str = include_str!("../../../tests/fixtures/jwt_foreign_key.pem");

    fn verifier() -> BearerVerifier {
        BearerVerifier::new(
            Arc::new(StaticKeySource::from_rsa_pem(VERIFYING_KEY.as_bytes()).unwrap()),
            ISSUER,
        )
    }

    fn sign_with(claims: serde_json::Value, pem: &str) -> Secret<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("test-kid".to_string());
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        Secret::new(encode(&header, &claims, &key).unwrap())
    }

    fn sign(claims: serde_json::Value) -> Secret<String> {
        sign_with(claims, SIGNING_KEY)
    }

    fn claims() -> serde_json::Value {
        json!({
            "sub": "etl-service-client",
            "client_id": "etl-service-client",
            "iss": ISSUER,
            "token_use": "access",
            "scope": "athena-api/query.read athena-api/query.write",
            "exp": chrono::Utc::now().timestamp() + 3600,
        })
    }

    #[test]
    fn test_parse_authorization() {
        assert!(matches!(parse_authorization(None), Err(ProxyError::MissingBearer)));
        assert!(matches!(
            parse_authorization(Some("Basic abc")),
            Err(ProxyError::MissingBearer)
        ));
        assert!(matches!(
            parse_authorization(Some("Bearer   ")),
            Err(ProxyError::MissingAccessToken)
        ));
        assert_eq!(
            parse_authorization(Some("Bearer a.b.c")).unwrap().expose_secret(),
            "a.b.c"
        );
    }

    #[test]
    fn test_decode_segment_restores_padding() {
        // "{\"a\":1}" is 7 bytes, encoded without padding to 10 characters.
        assert_eq!(decode_segment("eyJhIjoxfQ").unwrap(), br#"{"a":1}"#.to_vec());
        assert!(decode_segment("e").is_err());
    }

    #[tokio::test]
    async fn test_valid_token_yields_client_identity() {
        let identity = verifier().verify(&sign(claims())).await.unwrap();

        assert_eq!(identity.strategy, AuthStrategy::ClientCredentials);
        assert_eq!(identity.client_id.as_deref(), Some("etl-service-client"));
        assert_eq!(
            identity.scopes,
            vec![
                "athena-api/query.read".to_string(),
                "athena-api/query.write".to_string()
            ]
        );
        assert_eq!(identity.token_use.as_deref(), Some("access"));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let mut claims = claims();
        claims["exp"] = json!(chrono::Utc::now().timestamp() - 10);

        let err = verifier().verify(&sign(claims)).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidToken));
    }

    #[test]
    fn test_token_expires_at_exp_second() {
        let exp = 1_705_324_800;
        let mut claims = claims();
        claims["exp"] = json!(exp);
        let claims: AccessClaims = serde_json::from_value(claims).unwrap();
        let verifier = verifier();

        assert!(verifier.check_claims_at(&claims, exp - 1).is_ok());
        assert!(matches!(
            verifier.check_claims_at(&claims, exp),
            Err(ProxyError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_missing_exp_rejected() {
        let mut claims = claims();
        claims.as_object_mut().unwrap().remove("exp");

        let err = verifier().verify(&sign(claims)).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidToken));
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let mut claims = claims();
        claims["iss"] = json!("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_Other");

        let err = verifier().verify(&sign(claims)).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidToken));
    }

    #[tokio::test]
    async fn test_id_token_rejected_as_wrong_type() {
        let mut claims = claims();
        claims["token_use"] = json!("id");

        let err = verifier().verify(&sign(claims)).await.unwrap_err();
        assert!(matches!(err, ProxyError::WrongTokenUse));
    }

    #[tokio::test]
    async fn test_signature_from_other_key_rejected() {
        let err = verifier()
            .verify(&sign_with(claims(), FOREIGN_KEY))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidToken));
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let token = sign(claims());
        let parts: Vec<&str> = token.expose_secret().split('.').collect();

        let mut elevated = claims();
        elevated["scope"] = json!("athena-api/query.admin");
        let forged_payload =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(elevated.to_string());
        let forged = Secret::new(format!("{}.{}.{}", parts[0], forged_payload, parts[2]));

        let err = verifier().verify(&forged).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidToken));
    }

    #[tokio::test]
    async fn test_unsigned_token_rejected() {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(r#"{"alg":"none","typ":"JWT"}"#);
        let payload =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(claims().to_string());
        let token = Secret::new(format!("{}.{}.sig", header, payload));

        let err = verifier().verify(&token).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidToken));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        for raw in ["", "abc", "a.b", "a..c", "a.b.c.d", "!!.??.##"] {
            let err = verifier()
                .verify(&Secret::new(raw.to_string()))
                .await
                .unwrap_err();
            assert!(matches!(err, ProxyError::InvalidToken), "{raw}");
        }
    }
}
