//! Password login: trades the shared workspace password for a session token.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use boardcast_sync::{AdmissionError, SessionTokens, SyncError};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PASSWORD: &str = "boardcast";

/// Where the password came from, for the startup log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordSource {
    Env,
    File,
    Flag,
    Default,
}

/// Pick the password: environment first, then the password file, then the flag.
pub fn resolve_password(
    env: Option<String>,
    file: Option<&Path>,
    flag: Option<String>,
) -> anyhow::Result<(String, PasswordSource)> {
    if let Some(password) = env.filter(|p| !p.is_empty()) {
        return Ok((password, PasswordSource::Env));
    }
    if let Some(path) = file {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read password file {}", path.display()))?;
        let password = data.trim();
        if password.is_empty() {
            anyhow::bail!("password file {} is empty", path.display());
        }
        return Ok((password.to_string(), PasswordSource::File));
    }
    if let Some(password) = flag.filter(|p| !p.is_empty()) {
        return Ok((password, PasswordSource::Flag));
    }
    Ok((DEFAULT_PASSWORD.to_string(), PasswordSource::Default))
}

#[derive(Clone)]
pub struct AuthState {
    password: Arc<str>,
    tokens: Arc<SessionTokens>,
}

impl AuthState {
    pub fn new(password: impl Into<Arc<str>>, tokens: Arc<SessionTokens>) -> Self {
        Self {
            password: password.into(),
            tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
}

pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/api/auth", post(login))
        .with_state(state)
}

async fn login(
    State(state): State<AuthState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, SyncError> {
    if request.password.as_str() != &*state.password {
        log::warn!("Authentication failed: invalid password");
        return Err(AdmissionError::Invalid.into());
    }
    let token = state.tokens.issue();
    log::info!("Issued session token ({} active)", state.tokens.len());
    Ok(Json(LoginResponse { token }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use boardcast_sync::{admit, TokenVerifier};
    use std::time::Duration;
    use tower::ServiceExt;

    fn login_request(password: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/auth")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({ "password": password }).to_string(),
            ))
            .unwrap()
    }

    #[test]
    fn test_password_priority() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("password");
        std::fs::write(&file, "from-file\n").unwrap();

        let (p, source) =
            resolve_password(Some("from-env".into()), Some(&file), Some("flag".into())).unwrap();
        assert_eq!((p.as_str(), source), ("from-env", PasswordSource::Env));

        let (p, source) = resolve_password(None, Some(&file), Some("flag".into())).unwrap();
        assert_eq!((p.as_str(), source), ("from-file", PasswordSource::File));

        let (p, source) = resolve_password(Some(String::new()), None, Some("flag".into())).unwrap();
        assert_eq!((p.as_str(), source), ("flag", PasswordSource::Flag));

        let (p, source) = resolve_password(None, None, None).unwrap();
        assert_eq!((p.as_str(), source), (DEFAULT_PASSWORD, PasswordSource::Default));
    }

    #[test]
    fn test_missing_password_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_password(None, Some(&dir.path().join("nope")), None).is_err());
    }

    #[tokio::test]
    async fn test_login_issues_usable_token() {
        let tokens = Arc::new(SessionTokens::new(Duration::from_secs(60)));
        let app = router(AuthState::new("secret", tokens.clone()));

        let response = app.oneshot(login_request("secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let token = body["token"].as_str().unwrap();

        assert!(admit(tokens.as_ref() as &dyn TokenVerifier, Some(token)).is_ok());
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let tokens = Arc::new(SessionTokens::new(Duration::from_secs(60)));
        let app = router(AuthState::new("secret", tokens.clone()));

        let response = app.oneshot(login_request("guess")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(tokens.is_empty());
    }
}
