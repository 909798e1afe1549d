//! Password hashing, session-token digesting, and the cached "quick"
//! session check used on the hot move path.
//!
//! Grounded in `trilltino-XFChess/backend/src/auth.rs`: `argon2` for
//! password hashing, `jsonwebtoken` for a signed claims check, `chrono` for
//! expiry math. The raw session token is never stored — only its `sha2`
//! digest, so a leaked store dump doesn't hand out live tokens.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::SessionError;

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default().hash_password(password.as_bytes(), &salt).map(|h| h.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

/// A fresh, unguessable session token — the bytes that go over the wire to
/// the client. Only `digest_token`'s output is ever persisted.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn digest_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Claims carried by the quick-check token. Mirrors the session record's
/// identity and expiry so the move path can skip a `SessionStore` round
/// trip, per `spec.md` §5's "cached JWT-like verification" allowance.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    session_id: String,
    exp: i64,
}

/// Signs and verifies the quick-check token. Holds the server's token
/// secret; cheap to clone (wraps `Arc`-free owned keys since
/// `jsonwebtoken`'s keys are themselves cheap to construct per call).
pub struct QuickSessionVerifier {
    secret: String,
}

impl QuickSessionVerifier {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    pub fn issue(&self, player_id: Uuid, session_id: Uuid, expires_at: DateTime<Utc>) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims { sub: player_id.to_string(), session_id: session_id.to_string(), exp: expires_at.timestamp() };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
    }

    /// Verifies signature and expiry only — does not consult the revocation
    /// list. Callers on the hot move path accept eventual consistency with
    /// `SessionStore::revoke` in exchange for skipping the store call.
    pub fn quick_check(&self, token: &str) -> Result<(Uuid, Uuid), SessionError> {
        let data = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &Validation::default())
            .map_err(|_| SessionError::NotAParticipant)?;
        let player_id = Uuid::parse_str(&data.claims.sub).map_err(|_| SessionError::NotAParticipant)?;
        let session_id = Uuid::parse_str(&data.claims.session_id).map_err(|_| SessionError::NotAParticipant)?;
        Ok((player_id, session_id))
    }
}

pub fn token_expiry(hours: i64) -> DateTime<Utc> {
    Utc::now() + Duration::hours(hours)
}
