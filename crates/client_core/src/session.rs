//! Bearer credential and display identity supplied by the sign-in flow.
//!
//! The token is the only state that survives a restart: when the session is
//! file-backed it is written on sign-in and removed once the authority
//! reports it expired.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tokio::sync::RwLock;
use tracing::{info, warn};

pub const UNKNOWN_AUTHOR: &str = "Unknown User";

#[derive(Default)]
struct SessionState {
    token: Option<String>,
    identity: Option<String>,
}

#[derive(Default)]
pub struct Session {
    state: RwLock<SessionState>,
    path: Option<PathBuf>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(SessionState {
                token: Some(token.into()),
                identity: None,
            }),
            path: None,
        }
    }

    /// Opens a file-backed session, picking up a token persisted by an earlier run.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let token = match fs::read_to_string(&path) {
            Ok(raw) => Some(raw.trim().to_string()).filter(|token| !token.is_empty()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        Ok(Self {
            state: RwLock::new(SessionState {
                token,
                identity: None,
            }),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn sign_in(&self, token: impl Into<String>, identity: Option<String>) -> io::Result<()> {
        let token = token.into();
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &token).await?;
        }
        let mut guard = self.state.write().await;
        guard.token = Some(token);
        guard.identity = identity;
        Ok(())
    }

    pub async fn set_identity(&self, name: impl Into<String>) {
        self.state.write().await.identity = Some(name.into());
    }

    pub async fn token(&self) -> Option<String> {
        self.state.read().await.token.clone()
    }

    pub async fn identity(&self) -> Option<String> {
        self.state.read().await.identity.clone()
    }

    pub async fn author_name(&self) -> String {
        self.identity()
            .await
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.token.is_some()
    }

    /// Drops the credential after the authority rejected it.
    pub async fn invalidate(&self) {
        {
            let mut guard = self.state.write().await;
            if guard.token.is_none() && guard.identity.is_none() {
                return;
            }
            guard.token = None;
            guard.identity = None;
        }
        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), error = %err, "failed to remove session file"),
            }
        }
        info!("session invalidated");
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
