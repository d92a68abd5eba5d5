//! Bearer-token authentication and token issuing.

use crate::config::AuthOptions;
use crate::error::AppError;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Claims carried by a verified token.
pub type Claims = Map<String, Value>;

/// The acting user of a request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthUser {
    pub id: Value,
    pub roles: Vec<String>,
    /// Every claim of the token (or whatever the resolver attached).
    pub claims: Claims,
}

impl AuthUser {
    pub fn new(id: impl Into<Value>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        AuthUser {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            claims: Map::new(),
        }
    }

    /// `id` (or `sub`) and `roles` (array or comma separated string) taken from the claims.
    pub fn from_claims(claims: Claims) -> Self {
        let id = claims
            .get("id")
            .or_else(|| claims.get("sub"))
            .cloned()
            .unwrap_or(Value::Null);
        let roles = match claims.get("roles") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        AuthUser { id, roles, claims }
    }

    /// Case-insensitive membership.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Attribute lookup used by role predicates: `id`, `roles`, then any claim.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(self.id.clone()),
            "roles" => Some(Value::from(self.roles.clone())),
            other => self.claims.get(other).cloned(),
        }
    }
}

/// Turns verified claims into the acting user, e.g. by loading roles from storage.
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn resolve(&self, claims: Claims) -> Result<Option<AuthUser>, AppError>;
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

#[derive(Clone)]
pub struct AuthService {
    secret: String,
    expiration: u64,
    resolver: Option<Arc<dyn UserResolver>>,
}

impl AuthService {
    pub fn new(options: &AuthOptions) -> Self {
        AuthService {
            secret: options.jwt_secret.clone(),
            expiration: options.jwt_expiration,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn UserResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Best effort: any missing, malformed or unverifiable token yields `None`.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Option<AuthUser> {
        let token = bearer_token(headers)?;
        let claims = match self.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(error = %e, "bearer token rejected");
                return None;
            }
        };
        match &self.resolver {
            None => Some(AuthUser::from_claims(claims)),
            Some(resolver) => match resolver.resolve(claims).await {
                Ok(user) => user,
                Err(e) => {
                    tracing::warn!(error = %e, "user resolution failed");
                    None
                }
            },
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        let data = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation)?;
        Ok(data.claims)
    }

    /// Sign an access token for `user` and a refresh token for `refresh`, both expiring after
    /// the configured lifetime.
    pub fn issue(&self, user: Claims, refresh: Claims) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.sign(user)?,
            refresh_token: self.sign(refresh)?,
            token_type: "bearer",
            expires_in: self.expiration,
        })
    }

    fn sign(&self, mut claims: Claims) -> Result<String, AppError> {
        let now = chrono::Utc::now().timestamp();
        claims.insert("iat".into(), Value::from(now));
        claims.insert("exp".into(), Value::from(now + self.expiration as i64));
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| AppError::Crypto(e.to_string()))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn service() -> AuthService {
        AuthService::new(&AuthOptions {
            jwt_secret: "test-secret".into(),
            jwt_expiration: 60,
        })
    }

    fn claims(v: Value) -> Claims {
        v.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn issued_token_authenticates() {
        let auth = service();
        let pair = auth
            .issue(claims(json!({"id": 7, "roles": ["Admin"]})), claims(json!({"id": 7})))
            .unwrap();
        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.expires_in, 60);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", pair.access_token)).unwrap(),
        );
        let user = auth.authenticate(&headers).await.unwrap();
        assert_eq!(user.id, json!(7));
        assert!(user.has_role("admin"));
    }

    #[tokio::test]
    async fn bad_or_missing_token_is_anonymous() {
        let auth = service();
        assert!(auth.authenticate(&HeaderMap::new()).await.is_none());
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer not.a.token"));
        assert!(auth.authenticate(&headers).await.is_none());
    }

    #[test]
    fn roles_from_comma_string_and_sub_fallback() {
        let user = AuthUser::from_claims(claims(json!({"sub": "u1", "roles": "a, b"})));
        assert_eq!(user.id, json!("u1"));
        assert_eq!(user.roles, ["a", "b"]);
        assert_eq!(user.attribute("sub"), Some(json!("u1")));
    }
}
