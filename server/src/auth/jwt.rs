use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::auth::middleware::Claims;
use crate::db::{self, DbPool};
use crate::error::{AuthError, StoreError};

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> std::io::Result<Vec<u8>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    std::fs::create_dir_all(data_dir)?;
    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Sign an access token for `user_id` valid for `ttl_minutes`.
pub fn issue_access_token(
    secret: &[u8],
    user_id: i64,
    ttl_minutes: i64,
) -> Result<(String, DateTime<Utc>), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expires_at = now + chrono::Duration::minutes(ttl_minutes);
    let claims = Claims {
        sub: user_id,
        iat: now.timestamp(),
        exp: expires_at.timestamp(),
    };

    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))?;
    Ok((token, expires_at))
}

/// SHA-256 hash of a token for storage comparison.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Record an issued token. Only its hash is stored.
pub fn store_access_token(
    db: &DbPool,
    user_id: i64,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let conn = db::lock(db)?;
    conn.execute(
        "INSERT INTO access_tokens (token_hash, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            hash_token(token),
            user_id,
            expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            db::now_rfc3339()
        ],
    )?;
    Ok(())
}

/// Issue a token and record it, for operator tooling and tests.
pub fn issue_and_store(
    db: &DbPool,
    secret: &[u8],
    user_id: i64,
    ttl_minutes: i64,
) -> Result<String, StoreError> {
    let (token, expires_at) = issue_access_token(secret, user_id, ttl_minutes)
        .map_err(|e| StoreError::Unavailable(format!("token signing failed: {}", e)))?;
    store_access_token(db, user_id, &token, expires_at)?;
    Ok(token)
}

/// Validate an access token's signature and expiry and return its claims.
pub fn validate_access_token(secret: &[u8], token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.leeway = 0;
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        })
}

/// Full token check: valid signature, unexpired, and still on record for the
/// same user. Returns the user id.
pub fn verify_token(db: &DbPool, secret: &[u8], token: &str) -> Result<i64, crate::error::GateError> {
    let claims = validate_access_token(secret, token)?;

    let conn = db::lock(db)?;
    let row: Option<(i64, String)> = match conn.query_row(
        "SELECT user_id, expires_at FROM access_tokens WHERE token_hash = ?1",
        rusqlite::params![hash_token(token)],
        |row| Ok((row.get(0)?, row.get(1)?)),
    ) {
        Ok(r) => Some(r),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(StoreError::from(e).into()),
    };

    match row {
        None => Err(AuthError::InvalidToken.into()),
        Some((user_id, _)) if user_id != claims.sub => Err(AuthError::InvalidToken.into()),
        Some((_, expires_at)) if expires_at <= db::now_rfc3339() => {
            Err(AuthError::ExpiredToken.into())
        }
        Some((user_id, _)) => Ok(user_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let db = db::init_db(dir.path().to_str().unwrap()).unwrap();
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO users (id, username, created_at) VALUES (1, 'alice', '2026-01-01T00:00:00.000Z')",
                [],
            )
            .unwrap();
        (dir, db)
    }

    #[test]
    fn test_issued_token_verifies() {
        let (_dir, db) = test_db();
        let secret = [7u8; 32];
        let token = issue_and_store(&db, &secret, 1, 15).unwrap();
        assert_eq!(verify_token(&db, &secret, &token).unwrap(), 1);
    }

    #[test]
    fn test_unrecorded_token_is_invalid() {
        let (_dir, db) = test_db();
        let secret = [7u8; 32];
        let (token, _) = issue_access_token(&secret, 1, 15).unwrap();
        let err = verify_token(&db, &secret, &token).unwrap_err();
        assert!(matches!(
            err,
            crate::error::GateError::Auth(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let secret = [7u8; 32];
        let (token, _) = issue_access_token(&secret, 1, -5).unwrap();
        assert_eq!(
            validate_access_token(&secret, &token).unwrap_err(),
            AuthError::ExpiredToken
        );
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let (token, _) = issue_access_token(&[1u8; 32], 1, 15).unwrap();
        assert_eq!(
            validate_access_token(&[2u8; 32], &token).unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[test]
    fn test_secret_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let first = load_or_generate_jwt_secret(path).unwrap();
        let second = load_or_generate_jwt_secret(path).unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
    }
}
