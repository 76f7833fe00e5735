//! HTTP client shared by the external service adapters

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::PipelineError;

/// JSON-over-HTTP client for one external service
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    /// Attach a bearer token to every request
    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", key.expose_secret()),
            ),
            None => request,
        }
    }

    /// GET a JSON document; `None` when the service answers 404
    pub async fn get<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<Option<T>, PipelineError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let request = self
            .authorize(self.client.get(&url))
            .header(header::ACCEPT, "application/json")
            .query(query);
        let response = request.send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(PipelineError::external(format!("GET {}: {}: {}", path, status, body)));
        }

        let body = response.json().await?;
        Ok(Some(body))
    }

    /// POST a JSON body and decode the JSON reply
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PipelineError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let request = self.authorize(self.client.post(&url)).json(body);
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP POST failed: {} - {}", status, body);
            return Err(PipelineError::external(format!("POST {}: {}: {}", path, status, body)));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_base_url_is_normalized() {
        let client = HttpClient::new("https://edge.test/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "https://edge.test");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let client = HttpClient::new("https://edge.test", Duration::from_secs(1))
            .unwrap()
            .with_api_key(Some(SecretString::from("super-secret")));
        let printed = format!("{:?}", client);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("REDACTED"));
    }

    #[tokio::test]
    async fn test_get_maps_not_found_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entries/site:a"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let found: Option<Value> = client.get("/entries/site:a", &[("path", "x")]).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_get_error_status_is_external() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resolve"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = client
            .get::<Value, _>("/resolve", &[("name", "example.com")])
            .await
            .unwrap_err();
        match err {
            PipelineError::ExternalService(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("overloaded"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_sends_bearer_and_decodes_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/purge"))
            .and(header("authorization", "Bearer edge-key"))
            .and(body_json(json!({ "namespace": "site:a" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "purged": 4 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&format!("{}/", server.uri()), Duration::from_secs(5))
            .unwrap()
            .with_api_key(Some(SecretString::from("edge-key")));
        let reply: Value = client
            .post("/purge", &json!({ "namespace": "site:a" }))
            .await
            .unwrap();
        assert_eq!(reply["purged"], 4);
    }

    #[tokio::test]
    async fn test_post_error_status_is_external() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/certificates"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad domain"))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = client
            .post::<Value, _>("/certificates", &json!({ "domain": "example.com" }))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ExternalService(ref m) if m.contains("422")));
    }
}
