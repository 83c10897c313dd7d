use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::client::ApiClient;
use super::error::ApiResult;

#[derive(Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

// TODO Overwrite Debug for security since the token is a secret
#[derive(Deserialize)]
pub struct BearerToken {
    access_token: String,
}

impl BearerToken {
    pub fn secret(&self) -> &str {
        &self.access_token
    }
}

#[derive(Serialize)]
pub struct Registration {
    pub email: String,
    #[serde(rename = "nombre")]
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub email: String,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "activo")]
    pub active: bool,
    #[serde(rename = "es_admin")]
    pub is_admin: bool,
    pub created_at: NaiveDateTime,
}

pub async fn login(client: &ApiClient, credentials: &Credentials) -> ApiResult<BearerToken> {
    log::info!("Logging in...");
    let token = client.post_json("/auth/login", credentials).await?;
    log::info!("Logging in...done");
    Ok(token)
}

pub async fn register(client: &ApiClient, registration: &Registration) -> ApiResult<SessionUser> {
    log::info!("Registering account...");
    let user = client.post_json("/auth/registro", registration).await?;
    log::info!("Registering account...done");
    Ok(user)
}

/// Who the stored credential belongs to, straight from the service.
pub async fn current_user(client: &ApiClient) -> ApiResult<SessionUser> {
    client.get_json("/auth/yo", &[]).await
}
