use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::models::User;

pub const TOKEN_USE_ACCESS: &str = "access";
pub const TOKEN_USE_REFRESH: &str = "refresh";

/// Token-signing settings, loaded once at startup and shared as app data.
#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            secret: std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            access_ttl_secs: env_i64("JWT_ACCESS_TTL_SECS", 3600),
            refresh_ttl_secs: env_i64("JWT_REFRESH_TTL_SECS", 86400),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// JWT claims carried by both access and refresh tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub token_use: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Hash a password with Argon2id and a fresh random salt (PHC-format output).
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("failed to hash password: {e}")))
}

/// Check a password against a stored PHC-format hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| ApiError::Internal(format!("stored password hash is invalid: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Split a display name into first/last components. The first whitespace
/// token becomes the first name; everything after it becomes the last name.
pub fn split_name(name: &str) -> (String, String) {
    let mut parts = name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let last = parts.collect::<Vec<_>>().join(" ");
    (first, last)
}

fn issue_token(
    user_id: Uuid,
    username: &str,
    token_use: &str,
    ttl_secs: i64,
    config: &AuthConfig,
) -> Result<String, ApiError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        token_use: token_use.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("failed to sign token: {e}")))
}

/// Issue an access + refresh pair for a freshly authenticated user.
pub fn issue_token_pair(user: &User, config: &AuthConfig) -> Result<TokenPair, ApiError> {
    Ok(TokenPair {
        access: issue_token(
            user.id,
            &user.username,
            TOKEN_USE_ACCESS,
            config.access_ttl_secs,
            config,
        )?,
        refresh: issue_token(
            user.id,
            &user.username,
            TOKEN_USE_REFRESH,
            config.refresh_ttl_secs,
            config,
        )?,
    })
}

/// Decode and validate a token, additionally checking its `token_use` claim.
pub fn verify_token(
    token: &str,
    expected_use: &str,
    config: &AuthConfig,
) -> Result<Claims, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Authentication("token is invalid or expired".to_string()))?;
    if data.claims.token_use != expected_use {
        return Err(ApiError::Authentication(
            "token is not valid for this purpose".to_string(),
        ));
    }
    Ok(data.claims)
}

/// Exchange a valid refresh token for a new access token.
pub fn refresh_access_token(refresh: &str, config: &AuthConfig) -> Result<String, ApiError> {
    let claims = verify_token(refresh, TOKEN_USE_REFRESH, config)?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Authentication("token subject is malformed".to_string()))?;
    issue_token(
        user_id,
        &claims.username,
        TOKEN_USE_ACCESS,
        config.access_ttl_secs,
        config,
    )
}

/// The authenticated caller, resolved from the bearer token.
///
/// Handlers take this as an explicit parameter; there is no ambient
/// request-user state. Extraction fails with a 401 before any handler runs.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(resolve_user(req))
    }
}

fn resolve_user(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let config = req
        .app_data::<web::Data<AuthConfig>>()
        .ok_or_else(|| ApiError::Internal("auth config is not registered".to_string()))?;
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Authentication("missing bearer token".to_string()))?;
    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Authentication("missing bearer token".to_string()))?;
    let claims = verify_token(token, TOKEN_USE_ACCESS, config)?;
    let id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Authentication("token subject is malformed".to_string()))?;
    Ok(AuthUser {
        id,
        username: claims.username,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig {
            secret: "test-secret".to_string(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 86400,
        }
    }

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "jane@x.com".to_string(),
            email: "jane@x.com".to_string(),
            password_hash: String::new(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("pw").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("pw", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn name_splitting() {
        assert_eq!(split_name("Jane Doe"), ("Jane".into(), "Doe".into()));
        assert_eq!(
            split_name("Jane van der Berg"),
            ("Jane".into(), "van der Berg".into())
        );
        assert_eq!(split_name("Jane"), ("Jane".into(), String::new()));
        assert_eq!(split_name(""), (String::new(), String::new()));
        assert_eq!(split_name("  Jane  Doe  "), ("Jane".into(), "Doe".into()));
    }

    #[test]
    fn token_pair_round_trip() {
        let config = test_config();
        let user = test_user();
        let pair = issue_token_pair(&user, &config).unwrap();

        let claims = verify_token(&pair.access, TOKEN_USE_ACCESS, &config).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.username, "jane@x.com");

        let claims = verify_token(&pair.refresh, TOKEN_USE_REFRESH, &config).unwrap();
        assert_eq!(claims.token_use, TOKEN_USE_REFRESH);
    }

    #[test]
    fn refresh_token_is_rejected_as_access_token() {
        let config = test_config();
        let pair = issue_token_pair(&test_user(), &config).unwrap();
        let err = verify_token(&pair.refresh, TOKEN_USE_ACCESS, &config).unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = AuthConfig {
            access_ttl_secs: -120,
            ..test_config()
        };
        let pair = issue_token_pair(&test_user(), &config).unwrap();
        let err = verify_token(&pair.access, TOKEN_USE_ACCESS, &config).unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let config = test_config();
        let other = AuthConfig {
            secret: "other-secret".to_string(),
            ..test_config()
        };
        let pair = issue_token_pair(&test_user(), &other).unwrap();
        assert!(verify_token(&pair.access, TOKEN_USE_ACCESS, &config).is_err());
    }

    #[test]
    fn refresh_yields_a_usable_access_token() {
        let config = test_config();
        let user = test_user();
        let pair = issue_token_pair(&user, &config).unwrap();
        let access = refresh_access_token(&pair.refresh, &config).unwrap();
        let claims = verify_token(&access, TOKEN_USE_ACCESS, &config).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
    }

    #[test]
    fn access_token_cannot_be_used_to_refresh() {
        let config = test_config();
        let pair = issue_token_pair(&test_user(), &config).unwrap();
        assert!(refresh_access_token(&pair.access, &config).is_err());
    }

    #[actix_web::test]
    async fn extractor_resolves_a_valid_bearer_token() {
        let config = test_config();
        let user = test_user();
        let pair = issue_token_pair(&user, &config).unwrap();

        let req = actix_web::test::TestRequest::default()
            .app_data(web::Data::new(config))
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", pair.access)))
            .to_http_request();
        let auth = AuthUser::from_request(&req, &mut Payload::None)
            .await
            .unwrap();
        assert_eq!(auth.id, user.id);
        assert_eq!(auth.username, "jane@x.com");
    }

    #[actix_web::test]
    async fn extractor_rejects_missing_and_garbage_tokens() {
        let req = actix_web::test::TestRequest::default()
            .app_data(web::Data::new(test_config()))
            .to_http_request();
        let err = AuthUser::from_request(&req, &mut Payload::None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));

        let req = actix_web::test::TestRequest::default()
            .app_data(web::Data::new(test_config()))
            .insert_header((header::AUTHORIZATION, "Bearer not-a-jwt"))
            .to_http_request();
        let err = AuthUser::from_request(&req, &mut Payload::None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }
}
