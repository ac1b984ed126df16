use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ClassificationConfig;

use super::label_store::Category;

#[derive(Debug, Deserialize)]
struct LabelResponse {
    category: Category,
    #[serde(default)]
    name: Option<String>,
}

/// Optional remote address-labelling service, bearer-token authenticated.
pub struct LabelServiceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LabelServiceClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre::eyre!("Failed to build label service client: {}", e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// `None` unless both a URL and a key are configured. A URL without a key is
    /// reported once and classification continues from the static table only.
    pub fn from_config(config: &ClassificationConfig, timeout: Duration) -> Option<Self> {
        let url = config.service_url.as_deref()?;
        let Some(key) = config
            .service_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
        else {
            tracing::info!(
                "Label service URL is set but LABEL_SERVICE_API_KEY is not; \
                 classifying from the static address table only"
            );
            return None;
        };

        match Self::new(url, key, timeout) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "Label service disabled");
                None
            }
        }
    }

    /// Look up one address. `Ok(None)` when the service has no label for it.
    pub async fn lookup(&self, address: &str) -> eyre::Result<Option<(Category, Option<String>)>> {
        let url = format!("{}/labels/{}", self.base_url, address);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| eyre::eyre!("Label service request failed: {}", e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: LabelResponse = response
                    .json()
                    .await
                    .map_err(|e| eyre::eyre!("Unexpected label service response: {}", e))?;
                Ok(Some((body.category, body.name)))
            }
            status => Err(eyre::eyre!("Label service returned HTTP {}", status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_lookup_sends_bearer_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/labels/0x00000000000000000000000000000000000000aa")
                    .header("Authorization", "Bearer secret");
                then.status(200)
                    .json_body(serde_json::json!({ "category": "institutional", "name": "Fund" }));
            })
            .await;

        let client = LabelServiceClient::new(&server.base_url(), "secret", Duration::from_secs(5)).unwrap();
        let label = client
            .lookup("0x00000000000000000000000000000000000000aa")
            .await
            .unwrap();
        assert_eq!(label, Some((Category::Institutional, Some("Fund".to_string()))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(404);
            })
            .await;

        let client = LabelServiceClient::new(&server.base_url(), "secret", Duration::from_secs(5)).unwrap();
        assert_eq!(client.lookup("0xabc").await.unwrap(), None);
    }

    #[test]
    fn test_missing_key_disables_service() {
        let config = ClassificationConfig {
            service_url: Some("http://localhost:1".to_string()),
            service_api_key: None,
            ..ClassificationConfig::default()
        };
        assert!(LabelServiceClient::from_config(&config, Duration::from_secs(1)).is_none());
    }
}
