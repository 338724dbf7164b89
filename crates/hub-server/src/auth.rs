//! Caller authentication for sockets and the per-user REST routes.
//!
//! A user token is `base64url(HMAC-SHA256(INTERNAL_TOKEN, user_id))`. The
//! CRUD side mints it at login with the secret it already shares with the
//! hub; the hub only verifies. With no secret configured every check
//! passes (local development).

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use hub_shared::UserId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Default)]
pub struct Credentials {
    secret: Option<Arc<str>>,
}

impl Credentials {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()).map(Arc::from),
        }
    }

    pub fn enabled(&self) -> bool {
        self.secret.is_some()
    }

    fn mac(secret: &str, user: &UserId) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(user.as_str().as_bytes());
        Some(mac)
    }

    /// The token `user` presents. `None` when authentication is off.
    pub fn issue(&self, user: &UserId) -> Option<String> {
        let mac = Self::mac(self.secret.as_deref()?, user)?;
        Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Whether `token` was issued for `user`.
    pub fn verify_user(&self, user: &UserId, token: Option<&str>) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return true;
        };
        if user.is_blank() {
            return false;
        }
        let Some(tag) = token.and_then(|t| URL_SAFE_NO_PAD.decode(t.trim()).ok()) else {
            return false;
        };
        match Self::mac(secret, user) {
            Some(mac) => mac.verify_slice(&tag).is_ok(),
            None => false,
        }
    }

    /// Whether `token` is the shared service secret itself.
    pub fn verify_internal(&self, token: Option<&str>) -> bool {
        let Some(expected) = self.secret.as_deref() else {
            return true;
        };
        let presented = token.unwrap_or("").as_bytes();
        let expected = expected.as_bytes();
        presented.len() == expected.len() && presented.ct_eq(expected).unwrap_u8() == 1
    }
}

/// The token from an `Authorization: Bearer ...` header.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    Some(auth.strip_prefix("Bearer ").unwrap_or(auth).trim())
}
