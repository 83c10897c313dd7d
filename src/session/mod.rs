use serde::{Deserialize, Serialize};

mod data;
mod file;
mod store;

#[derive(Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq, Eq, Debug))]
pub enum Session {
    V1(SessionV1),
}

pub use data::{SessionV1, DEFAULT_SERVER_URL};
pub use store::{SessionStore, SESSION_PATH};
