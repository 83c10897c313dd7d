pub mod auth;
mod client;
pub mod conversion;
mod error;
pub mod history;
pub mod mappings;

pub use client::{ApiClient, CredentialStore};
pub use error::{ApiError, ApiResult};
