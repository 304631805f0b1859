//! Authenticator (spec §4.2): verifies a signed bearer token and produces an
//! `Identity`.

use crate::error::{ChainboxError, ChainboxResult};
use crate::types::Identity;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value as Json;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AuthenticatorConfig {
    pub secret: String,
    pub allowed_algorithms: Vec<Algorithm>,
    pub default_role: String,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            allowed_algorithms: vec![Algorithm::HS256],
            default_role: "user".to_string(),
        }
    }
}

pub struct Authenticator {
    config: AuthenticatorConfig,
}

impl Authenticator {
    pub fn new(config: AuthenticatorConfig) -> Self {
        Self { config }
    }

    /// Verify `token` and build an `Identity`. Fails with `UNAUTHORIZED` on
    /// signature mismatch, expiry, or malformed token (spec §4.2).
    pub fn authenticate(&self, token: &str) -> ChainboxResult<Identity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = self.config.allowed_algorithms.clone();
        validation.validate_exp = true;

        let key = DecodingKey::from_secret(self.config.secret.as_bytes());
        let data = decode::<HashMap<String, Json>>(token, &key, &validation)
            .map_err(|e| ChainboxError::Unauthorized(e.to_string()))?;

        let mut claims = data.claims;
        let id = claims
            .remove("sub")
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| ChainboxError::Unauthorized("token missing sub claim".to_string()))?;
        let email = claims
            .remove("email")
            .and_then(|v| v.as_str().map(|s| s.to_string()));
        let role = claims
            .remove("role")
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| self.config.default_role.clone());
        claims.remove("exp");
        claims.remove("iat");
        claims.remove("nbf");

        Ok(Identity {
            id,
            email,
            role: Some(role),
            token: Some(token.to_string()),
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn make_token(secret: &str, claims: serde_json::Map<String, Json>) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn authenticates_valid_token() {
        let secret = "s3cr3t";
        let auth = Authenticator::new(AuthenticatorConfig {
            secret: secret.to_string(),
            ..Default::default()
        });
        let exp = chrono::Utc::now().timestamp() + 3600;
        let mut claims = serde_json::Map::new();
        claims.insert("sub".into(), json!("user-1"));
        claims.insert("role".into(), json!("admin"));
        claims.insert("exp".into(), json!(exp));
        let token = make_token(secret, claims);

        let identity = auth.authenticate(&token).unwrap();
        assert_eq!(identity.id, "user-1");
        assert_eq!(identity.role.as_deref(), Some("admin"));
        assert_eq!(identity.token.as_deref(), Some(token.as_str()));
    }

    #[test]
    fn rejects_bad_signature() {
        let auth = Authenticator::new(AuthenticatorConfig {
            secret: "right".to_string(),
            ..Default::default()
        });
        let exp = chrono::Utc::now().timestamp() + 3600;
        let mut claims = serde_json::Map::new();
        claims.insert("sub".into(), json!("user-1"));
        claims.insert("exp".into(), json!(exp));
        let token = make_token("wrong", claims);

        assert!(auth.authenticate(&token).is_err());
    }

    #[test]
    fn defaults_role_when_absent() {
        let secret = "s3cr3t";
        let auth = Authenticator::new(AuthenticatorConfig {
            secret: secret.to_string(),
            ..Default::default()
        });
        let exp = chrono::Utc::now().timestamp() + 3600;
        let mut claims = serde_json::Map::new();
        claims.insert("sub".into(), json!("user-1"));
        claims.insert("exp".into(), json!(exp));
        let token = make_token(secret, claims);

        let identity = auth.authenticate(&token).unwrap();
        assert_eq!(identity.role.as_deref(), Some("user"));
    }
}
