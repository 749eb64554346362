//! Shared-secret check for the trigger and admin endpoints.
//!
//! Callers send `Authorization: Bearer <secret>`. With no secret configured
//! every request is rejected.

use axum::http::{header, HeaderMap};
use secrecy::{ExposeSecret, SecretString};

use crate::types::SettlementError;

pub struct CronAuth {
    secret: Option<SecretString>,
}

impl CronAuth {
    pub fn new(secret: Option<SecretString>) -> Self {
        Self { secret }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Accept only an exact `Bearer` match against the configured secret.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), SettlementError> {
        let Some(secret) = &self.secret else {
            return Err(SettlementError::Unauthorized);
        };

        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(SettlementError::Unauthorized)?;

        if constant_time_eq(presented.as_bytes(), secret.expose_secret().as_bytes()) {
            Ok(())
        } else {
            Err(SettlementError::Unauthorized)
        }
    }
}

/// Byte comparison whose running time does not depend on where the first
/// mismatch is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
