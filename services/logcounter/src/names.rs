// App display names from the cloud controller. Lookups are best-effort: the
// report falls back to the raw app id whenever a name cannot be fetched.
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use logcounter_core::NameResolver;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
struct AppEntity {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct AppResponse {
    #[serde(default)]
    entity: AppEntity,
}

#[derive(Debug, Clone)]
pub struct CloudControllerNames {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CloudControllerNames {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn fetch_name(&self, application_id: &str, token: &str) -> Result<String> {
        let url = format!("{}/v2/apps/{}", self.base_url, application_id);
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header(reqwest::header::AUTHORIZATION, format!("bearer {token}"))
            .send()
            .await
            .context("app request")?;
        if response.status() != StatusCode::OK {
            return Err(anyhow!("got status {} while getting app name", response.status()));
        }
        let app: AppResponse = response.json().await.context("app body")?;
        Ok(app.entity.name)
    }
}

#[async_trait]
impl NameResolver for CloudControllerNames {
    async fn resolve_name(&self, application_id: &str, token: &str) -> String {
        if token.is_empty() {
            return application_id.to_string();
        }
        match self.fetch_name(application_id, token).await {
            Ok(name) if !name.is_empty() => name,
            Ok(_) => {
                tracing::warn!(app_id = application_id, "app has no name, using id");
                application_id.to_string()
            }
            Err(err) => {
                tracing::warn!(app_id = application_id, error = %format!("{err:#}"), "error getting app name");
                application_id.to_string()
            }
        }
    }
}
