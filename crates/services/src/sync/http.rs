use async_trait::async_trait;
use practice_core::ToggleIntent;
use practice_core::model::{ProgressSnapshot, UserId};
use reqwest::{RequestBuilder, StatusCode};

use crate::error::RemoteError;
use crate::sync::remote::RemoteProgress;

/// `RemoteProgress` over the HTTP API served by the `app` crate.
#[derive(Clone)]
pub struct HttpProgressClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    user: UserId,
}

impl HttpProgressClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, user: UserId) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token, user)
    }

    #[must_use]
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        user: UserId,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            http,
            base_url,
            token: token.into(),
            user,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<ProgressSnapshot, RemoteError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(RemoteError::Unauthorized);
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected(body));
        }
        if !status.is_success() {
            return Err(RemoteError::Transport(format!("server responded {status}")));
        }
        Ok(response.json::<ProgressSnapshot>().await?)
    }
}

#[async_trait]
impl RemoteProgress for HttpProgressClient {
    fn user(&self) -> &UserId {
        &self.user
    }

    async fn fetch(&self) -> Result<ProgressSnapshot, RemoteError> {
        self.send(self.http.get(self.url("/api/progress"))).await
    }

    async fn update(&self, intent: &ToggleIntent) -> Result<ProgressSnapshot, RemoteError> {
        self.send(self.http.post(self.url("/api/progress/update")).json(intent))
            .await
    }

    async fn reset(&self) -> Result<ProgressSnapshot, RemoteError> {
        self.send(self.http.post(self.url("/api/progress/reset"))).await
    }
}
