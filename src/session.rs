use crate::config::Credentials;
use crate::error::AuthError;
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "tracer_session";

/// An authenticated browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
}

/// Checks the shared credential pair and tracks issued session tokens.
pub struct SessionGate {
    credentials: Credentials,
    ttl: Duration,
    sessions: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SessionGate {
    pub fn new(credentials: Credentials, ttl: Duration) -> Self {
        Self {
            credentials,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        // Both fields are always compared.
        let user_ok = constant_time_eq(username.as_bytes(), self.credentials.username.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), self.credentials.password.as_bytes());
        if !(user_ok & pass_ok) {
            warn!("Rejected login attempt");
            return Err(AuthError::InvalidCredentials);
        }

        let token = Uuid::new_v4().simple().to_string();
        let mut sessions = self.sessions.lock().await;
        let now = Utc::now();
        sessions.retain(|_, created| now - *created < self.ttl);
        sessions.insert(token.clone(), now);
        info!("Session started ({} active)", sessions.len());

        Ok(Session { token })
    }

    pub async fn require_session(&self, headers: &HeaderMap) -> Result<Session, AuthError> {
        let token = session_token(headers).ok_or(AuthError::Unauthenticated)?;
        let mut sessions = self.sessions.lock().await;
        let created = *sessions.get(&token).ok_or(AuthError::Unauthenticated)?;
        if Utc::now() - created >= self.ttl {
            sessions.remove(&token);
            info!("Session expired");
            return Err(AuthError::Unauthenticated);
        }
        Ok(Session { token })
    }

    pub async fn logout(&self, headers: &HeaderMap) {
        if let Some(token) = session_token(headers) {
            if self.sessions.lock().await.remove(&token).is_some() {
                info!("Session ended");
            }
        }
    }
}

/// `Set-Cookie` value for a new session.
pub fn session_cookie(session: &Session, ttl: Duration) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        session.token,
        ttl.num_seconds().max(0)
    )
}

pub fn clear_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn gate(ttl: Duration) -> SessionGate {
        SessionGate::new(
            Credentials {
                username: "admin".to_string(),
                password: "s3cret".to_string(),
            },
            ttl,
        )
    }

    fn cookie_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn login_requires_exact_match() {
        let gate = gate(Duration::hours(1));
        assert!(gate.login("admin", "s3cret").await.is_ok());

        for (user, pass) in [
            ("Admin", "s3cret"),
            ("admin", "S3cret"),
            ("admin", "s3cret "),
            ("admin", ""),
            ("", "s3cret"),
            ("s3cret", "admin"),
        ] {
            assert_eq!(
                gate.login(user, pass).await,
                Err(AuthError::InvalidCredentials),
                "{:?}/{:?} should be rejected",
                user,
                pass
            );
        }
    }

    #[tokio::test]
    async fn issued_token_authorizes_requests() {
        let gate = gate(Duration::hours(1));
        let session = gate.login("admin", "s3cret").await.unwrap();

        let headers = cookie_headers(&format!("theme=dark; {}={}", SESSION_COOKIE, session.token));
        assert_eq!(gate.require_session(&headers).await, Ok(session));
    }

    #[tokio::test]
    async fn missing_or_unknown_token_is_rejected() {
        let gate = gate(Duration::hours(1));
        assert_eq!(
            gate.require_session(&HeaderMap::new()).await,
            Err(AuthError::Unauthenticated)
        );
        let headers = cookie_headers(&format!("{}=forged", SESSION_COOKIE));
        assert_eq!(gate.require_session(&headers).await, Err(AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn logout_destroys_session() {
        let gate = gate(Duration::hours(1));
        let session = gate.login("admin", "s3cret").await.unwrap();
        let headers = cookie_headers(&format!("{}={}", SESSION_COOKIE, session.token));

        gate.logout(&headers).await;
        assert_eq!(gate.require_session(&headers).await, Err(AuthError::Unauthenticated));
        // Second logout is a no-op.
        gate.logout(&headers).await;
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let gate = gate(Duration::zero());
        let session = gate.login("admin", "s3cret").await.unwrap();
        let headers = cookie_headers(&format!("{}={}", SESSION_COOKIE, session.token));
        assert_eq!(gate.require_session(&headers).await, Err(AuthError::Unauthenticated));
    }

    #[test]
    fn cookie_strings() {
        let session = Session {
            token: "abc".to_string(),
        };
        assert_eq!(
            session_cookie(&session, Duration::hours(1)),
            "tracer_session=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600"
        );
        assert!(clear_cookie().contains("Max-Age=0"));
    }

    #[test]
    fn constant_time_comparison() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abc\0"));
        assert!(constant_time_eq(b"", b""));
    }
}
