// OAuth token source backed by the UAA password grant.
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use logcounter_core::{CounterError, TokenProvider};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::CounterConfig;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct UaaTokenProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl UaaTokenProvider {
    pub fn new(client: reqwest::Client, config: &CounterConfig) -> Self {
        Self {
            client,
            token_url: format!("{}/oauth/token", config.uaa_url.trim_end_matches('/')),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: config.request_timeout(),
        }
    }

    async fn request_token(&self) -> Result<String> {
        let form = [
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("response_type", "token"),
            ("scope", ""),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .context("token request")?;
        if response.status() != StatusCode::OK {
            return Err(anyhow!("token response not 200: {}", response.status()));
        }
        let body: TokenResponse = response.json().await.context("token body")?;
        Ok(body.access_token)
    }
}

#[async_trait]
impl TokenProvider for UaaTokenProvider {
    async fn fetch_token(&self) -> logcounter_core::Result<String> {
        self.request_token()
            .await
            .map_err(|err| CounterError::Token(format!("{err:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::http_test::{build_test_client, serve};
    use crate::test_support::local_config as config;
    use axum::extract::Form;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[tokio::test]
    async fn password_grant_returns_access_token() -> Result<()> {
        let router = Router::new().route(
            "/oauth/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                let ok = form.get("grant_type").map(String::as_str) == Some("password")
                    && form.get("client_id").map(String::as_str) == Some("cf")
                    && form.get("client_secret").map(String::as_str) == Some("shh")
                    && form.get("username").map(String::as_str) == Some("admin")
                    && form.get("password").map(String::as_str) == Some("admin-pass")
                    && form.get("response_type").map(String::as_str) == Some("token")
                    && form.get("scope").map(String::as_str) == Some("");
                if ok {
                    Ok(Json(serde_json::json!({"access_token": "tok-1", "token_type": "bearer"})))
                } else {
                    Err(HttpStatus::UNAUTHORIZED)
                }
            }),
        );
        let server = serve(router).await?;
        let provider = UaaTokenProvider::new(build_test_client()?, &config(&server.base_url));
        assert_eq!(provider.fetch_token().await?, "tok-1");
        Ok(())
    }

    #[tokio::test]
    async fn non_200_is_a_token_error() -> Result<()> {
        let router = Router::new().route(
            "/oauth/token",
            post(|| async { HttpStatus::UNAUTHORIZED }),
        );
        let server = serve(router).await?;
        let provider = UaaTokenProvider::new(build_test_client()?, &config(&server.base_url));
        match provider.fetch_token().await {
            Err(CounterError::Token(message)) => assert!(message.contains("401")),
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn missing_access_token_yields_empty_string() -> Result<()> {
        let router = Router::new().route(
            "/oauth/token",
            post(|| async { Json(serde_json::json!({"error": "odd"})) }),
        );
        let server = serve(router).await?;
        let provider = UaaTokenProvider::new(build_test_client()?, &config(&server.base_url));
        assert_eq!(provider.fetch_token().await?, "");
        Ok(())
    }

    #[tokio::test]
    async fn stalled_identity_service_times_out() -> Result<()> {
        let router = Router::new().route(
            "/oauth/token",
            post(|| std::future::pending::<HttpStatus>()),
        );
        let server = serve(router).await?;
        let mut config = config(&server.base_url);
        config.request_timeout_ms = 50;
        // Client without its own deadline, so only the per-request one applies.
        let client = reqwest::Client::builder().no_proxy().build()?;
        let provider = UaaTokenProvider::new(client, &config);
        let outcome =
            tokio::time::timeout(Duration::from_secs(5), provider.fetch_token()).await?;
        assert!(matches!(outcome, Err(CounterError::Token(_))));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_identity_service_is_an_error() -> Result<()> {
        let provider =
            UaaTokenProvider::new(build_test_client()?, &config("http://127.0.0.1:1"));
        assert!(matches!(
            provider.fetch_token().await,
            Err(CounterError::Token(_))
        ));
        Ok(())
    }
}
