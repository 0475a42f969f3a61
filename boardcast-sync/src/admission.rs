//! Session admission for live-sync connections.
//!
//! A connection may only be registered with the hub once its presented
//! token verifies. The [`Admitted`] value is the proof: it can only be
//! obtained from [`admit`], and [`crate::connection::serve`] requires one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Verifier verdict for a presented token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Expired,
    Invalid,
}

/// Checks opaque session tokens.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Verification;
}

/// Why admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Missing session token")]
    MissingToken,
    #[error("Session token expired")]
    Expired,
    #[error("Invalid session token")]
    Invalid,
}

/// Proof that a session passed admission.
#[derive(Debug)]
pub struct Admitted {
    _private: (),
}

/// Verify the token presented by a connecting session.
pub fn admit(verifier: &dyn TokenVerifier, token: Option<&str>) -> Result<Admitted, AdmissionError> {
    let token = match token {
        Some(t) if !t.is_empty() => t,
        _ => return Err(AdmissionError::MissingToken),
    };
    match verifier.verify(token) {
        Verification::Valid => Ok(Admitted { _private: () }),
        Verification::Expired => Err(AdmissionError::Expired),
        Verification::Invalid => Err(AdmissionError::Invalid),
    }
}

/// In-memory token table with a fixed lifetime per issued token.
pub struct SessionTokens {
    tokens: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
}

impl SessionTokens {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh random token.
    pub fn issue(&self) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::days(1));
        self.tokens.insert(token.clone(), Utc::now() + ttl);
        token
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Drop every expired token. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, expires| *expires > now);
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[cfg(test)]
    fn insert_with_expiry(&self, token: &str, expires: DateTime<Utc>) {
        self.tokens.insert(token.to_string(), expires);
    }
}

impl TokenVerifier for SessionTokens {
    fn verify(&self, token: &str) -> Verification {
        match self.tokens.get(token) {
            Some(expires) if *expires > Utc::now() => Verification::Valid,
            Some(_) => Verification::Expired,
            None => Verification::Invalid,
        }
    }
}
