use std::path::PathBuf;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::api::CredentialStore;

use super::{file, SessionV1};

// TODO Configurable session file location
pub const SESSION_PATH: &str = "concar_import.session";

/// The process-wide credential slot. Every mutation writes the file back
/// immediately, so a later 401 or logout is never undone by a crash.
pub struct SessionStore {
    path: PathBuf,
    session: Mutex<SessionV1>,
}

impl SessionStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<SessionStore> {
        let path = path.into();
        let session = file::load(&path)
            .await
            .context("Failed to load session file")?
            .unwrap_or_default();
        Ok(SessionStore {
            path,
            session: Mutex::new(session),
        })
    }

    pub async fn server_url(&self) -> String {
        self.session.lock().await.server_url.clone()
    }

    pub async fn logged_in(&self) -> bool {
        self.session.lock().await.logged_in()
    }

    pub async fn store_login(
        &self,
        server_url: String,
        bearer_token: String,
        account_email: String,
    ) -> Result<()> {
        let mut session = self.session.lock().await;
        session.server_url = server_url;
        session.bearer_token = Some(bearer_token);
        session.account_email = Some(account_email);
        file::save(session.clone(), &self.path).await
    }

    pub async fn clear_credential(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        session.bearer_token = None;
        session.account_email = None;
        file::save(session.clone(), &self.path).await
    }
}

#[async_trait]
impl CredentialStore for SessionStore {
    async fn bearer(&self) -> Option<String> {
        self.session.lock().await.bearer_token.clone()
    }

    async fn clear(&self) {
        // A failed write only means the stale token survives until the next 401.
        if let Err(err) = self.clear_credential().await {
            log::warn!("Failed to clear stored credential: {err:#}");
        }
    }
}
