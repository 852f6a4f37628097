use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuthState {
    signer: Arc<TokenSigner>,
    limiter: Arc<TokenBuckets>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    User,
    Guest,
}

/// Inserted as a request extension once the bearer token checks out.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub subject: String,
    pub kind: IdentityKind,
}

impl AuthContext {
    /// Storage owner key. Prefixed so a guest id can never collide with a
    /// registered user id.
    pub fn owner_id(&self) -> String {
        match self.kind {
            IdentityKind::User => format!("user:{}", self.subject),
            IdentityKind::Guest => format!("guest:{}", self.subject),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.kind == IdentityKind::Guest
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    kind: IdentityKind,
    iat: i64,
    exp: i64,
}

pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenSigner {
    pub fn from_env() -> Self {
        let secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!(
                target = "c2c.auth",
                "JWT_SECRET not set; using the development secret"
            );
            "dev-secret".to_string()
        });
        let ttl_days = env::var("JWT_TTL_DAYS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(7);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn issue_user(&self, user_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue(user_id.to_string(), IdentityKind::User)
    }

    /// Mints a token for a brand-new anonymous identity.
    pub fn issue_guest(&self) -> Result<(String, String), jsonwebtoken::errors::Error> {
        let guest_id = Uuid::new_v4().to_string();
        let token = self.issue(guest_id.clone(), IdentityKind::Guest)?;
        Ok((guest_id, token))
    }

    fn issue(
        &self,
        subject: String,
        kind: IdentityKind,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject,
            kind,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Option<AuthContext> {
        let data =
            jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default()).ok()?;
        Some(AuthContext {
            subject: data.claims.sub,
            kind: data.claims.kind,
        })
    }
}

impl AuthState {
    pub fn from_env() -> Self {
        Self {
            signer: Arc::new(TokenSigner::from_env()),
            limiter: Arc::new(TokenBuckets::from_env()),
        }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Best-effort context from an optional Authorization header. Used by
    /// `/register` to pick up a guest identity worth migrating.
    pub fn context_from_headers(&self, headers: &http::HeaderMap) -> Option<AuthContext> {
        extract_bearer(headers).and_then(|token| self.signer.verify(&token))
    }

    async fn consume(&self, subject: &str) -> Result<RatePermit, RateExceeded> {
        self.limiter.consume(subject).await
    }
}

pub async fn require_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_bearer(request.headers()) else {
        let response =
            unauthorized_response("missing_token", "Provide an Authorization: Bearer token");
        return Ok(response);
    };

    let Some(context) = state.signer.verify(&presented) else {
        let response = unauthorized_response("invalid_token", "Token expired or not recognized");
        return Ok(response);
    };

    match state.consume(&context.owner_id()).await {
        Ok(permit) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            let mut response = too_many_requests("rate_limited", "Too many requests");
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_bearer(headers: &http::HeaderMap) -> Option<String> {
    let value = headers.get(http::header::AUTHORIZATION)?;
    let raw = value.to_str().ok()?;
    if raw.len() >= 7 && raw[..6].eq_ignore_ascii_case("bearer") {
        let token = raw[6..].trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

pub async fn hash_password(plain: String) -> Result<String, bcrypt::BcryptError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, bcrypt::DEFAULT_COST))
        .await
        .map_err(|err| bcrypt::BcryptError::InvalidHash(err.to_string()))?
}

pub async fn verify_password(plain: String, hash: String) -> Result<bool, bcrypt::BcryptError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
        .await
        .map_err(|err| bcrypt::BcryptError::InvalidHash(err.to_string()))?
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn too_many_requests(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(payload)).into_response()
}

#[derive(Clone)]
struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl TokenBuckets {
    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self {
            rate_per_sec,
            capacity,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn consume(&self, key: &str) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(RatePermit {
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        } else {
            let deficit = 1.0 - state.tokens;
            let retry_after = (deficit / self.rate_per_sec).max(0.0);
            Err(RateExceeded {
                retry_after,
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone)]
pub struct RatePermit {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RatePermit {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let remaining = self.tokens.max(0.0).floor() as u64;
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert(
            "X-RateLimit-Limit",
            HeaderValue::from_str(&(self.capacity as u64).to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
        headers.insert(
            "X-RateLimit-Remaining",
            HeaderValue::from_str(&remaining.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
        headers.insert(
            "X-RateLimit-Reset",
            HeaderValue::from_str(&reset.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
    }
}

#[derive(Debug, Clone)]
pub struct RateExceeded {
    retry_after: f64,
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RateExceeded {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let retry = self.retry_after.ceil().max(0.0) as u64;
        headers.insert(
            http::header::RETRY_AFTER,
            HeaderValue::from_str(&retry.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("1")),
        );
        headers.insert(
            "X-RateLimit-Limit",
            HeaderValue::from_str(&(self.capacity as u64).to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert(
            "X-RateLimit-Reset",
            HeaderValue::from_str(&reset.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner {
            encoding: EncodingKey::from_secret(b"test-secret"),
            decoding: DecodingKey::from_secret(b"test-secret"),
            ttl: Duration::days(7),
        }
    }

    #[test]
    fn user_token_round_trips() {
        let signer = signer();
        let user_id = Uuid::new_v4();
        let token = signer.issue_user(user_id).expect("issue");
        let context = signer.verify(&token).expect("verify");
        assert_eq!(context.subject, user_id.to_string());
        assert_eq!(context.kind, IdentityKind::User);
        assert_eq!(context.owner_id(), format!("user:{user_id}"));
        assert!(!context.is_guest());
    }

    #[test]
    fn guest_token_round_trips() {
        let signer = signer();
        let (guest_id, token) = signer.issue_guest().expect("issue");
        let context = signer.verify(&token).expect("verify");
        assert_eq!(context.subject, guest_id);
        assert!(context.is_guest());
        assert!(context.owner_id().starts_with("guest:"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signer = signer();
        let token = signer.issue_user(Uuid::new_v4()).expect("issue");
        let other = TokenSigner {
            encoding: EncodingKey::from_secret(b"other"),
            decoding: DecodingKey::from_secret(b"other"),
            ttl: Duration::days(7),
        };
        assert!(other.verify(&token).is_none());
        assert!(signer.verify("not-a-jwt").is_none());
    }

    #[test]
    fn bearer_extraction_ignores_other_schemes() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic abc123"),
        );
        assert!(extract_bearer(&headers).is_none());
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer  tok.en.value "),
        );
        assert_eq!(extract_bearer(&headers).as_deref(), Some("tok.en.value"));
    }

    #[tokio::test]
    async fn buckets_run_dry_and_refill() {
        let limiter = TokenBuckets {
            rate_per_sec: 1000.0,
            capacity: 2.0,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        };
        assert!(limiter.consume("a").await.is_ok());
        assert!(limiter.consume("a").await.is_ok());
        // other subjects keep their own bucket
        assert!(limiter.consume("b").await.is_ok());
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        assert!(limiter.consume("a").await.is_ok());
    }
}
