use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{self, ApiError, ApiResult};

/// Where the bearer credential lives. The client never caches the token; it
/// asks on every request and clears the slot when the service answers 401,
/// which sends the operator back through `login`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn bearer(&self) -> Option<String>;
    async fn clear(&self);
}

/// Typed client for the conversion service. Constructed with a base URL and
/// a credential store rather than reading either from ambient state, so the
/// workflow and the tests decide what it talks to.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialStore>) -> ApiClient {
        ApiClient {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, self.url(path));
        if let Some(token) = self.credentials.bearer().await {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> ApiResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|err| ApiError::Transfer(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.credentials.clear().await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(error::from_response(status, &body))
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        response
            .json()
            .await
            .map_err(|err| ApiError::Transfer(format!("malformed response: {err}")))
    }

    pub(super) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        let builder = self.request(Method::GET, path).await.query(query);
        let response = self.send(builder).await?;
        self.decode(response).await
    }

    pub(super) async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let builder = self.request(Method::POST, path).await.json(body);
        let response = self.send(builder).await?;
        self.decode(response).await
    }

    pub(super) async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let builder = self.request(Method::PUT, path).await.json(body);
        let response = self.send(builder).await?;
        self.decode(response).await
    }

    pub(super) async fn delete(&self, path: &str) -> ApiResult<()> {
        let builder = self.request(Method::DELETE, path).await;
        self.send(builder).await?;
        Ok(())
    }

    pub(super) async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
    ) -> ApiResult<T> {
        let builder = self.request(Method::POST, path).await.multipart(form);
        let response = self.send(builder).await?;
        self.decode(response).await
    }

    pub(super) async fn get_bytes(&self, path: &str) -> ApiResult<Vec<u8>> {
        let builder = self.request(Method::GET, path).await;
        let response = self.send(builder).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ApiError::Transfer(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
