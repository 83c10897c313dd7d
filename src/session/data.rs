use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000/api/v1";

/// Everything the client remembers between runs: which server it talks to
/// and, while logged in, the bearer credential and account it belongs to.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct SessionV1 {
    pub server_url: String,
    pub bearer_token: Option<String>,
    pub account_email: Option<String>,
}

impl SessionV1 {
    pub fn new(server_url: String) -> SessionV1 {
        SessionV1 {
            server_url,
            bearer_token: None,
            account_email: None,
        }
    }

    pub fn logged_in(&self) -> bool {
        self.bearer_token.is_some()
    }
}

impl Default for SessionV1 {
    fn default() -> SessionV1 {
        SessionV1::new(DEFAULT_SERVER_URL.to_string())
    }
}
