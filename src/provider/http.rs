use crate::error::AdapterResult;
use crate::models::ProviderKind;
use crate::normalize;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// How a provider expects its API key.
#[derive(Debug, Clone)]
pub enum Auth {
    Bearer(String),
    Header { name: &'static str, value: String },
}

/// Lightweight JSON REST client shared by the provider adapters.
///
/// Every failure leaves as an [`AdapterError`](crate::error::AdapterError)
/// classified by [`normalize`].
#[derive(Debug, Clone)]
pub struct ProviderHttpClient {
    client: Client,
    provider: ProviderKind,
    auth: Auth,
    base_url: String,
    timeout: Duration,
}

impl ProviderHttpClient {
    pub fn new(
        provider: ProviderKind,
        client: Client,
        auth: Auth,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            provider,
            auth,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn post_json<Req: Serialize + ?Sized, Resp: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> AdapterResult<Resp> {
        let builder = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .json(request);
        self.execute(builder).await
    }

    pub async fn get_json<Resp: DeserializeOwned>(&self, path: &str) -> AdapterResult<Resp> {
        let builder = self.client.get(format!("{}{}", self.base_url, path));
        self.execute(builder).await
    }

    async fn execute<Resp: DeserializeOwned>(&self, builder: RequestBuilder) -> AdapterResult<Resp> {
        let builder = match &self.auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Header { name, value } => builder.header(*name, value),
        };

        let response = builder.timeout(self.timeout).send().await.map_err(|e| {
            tracing::error!("Failed to send request to {}: {}", self.provider, e);
            normalize::adapter_error_from_transport(&e)
        })?;

        self.read_response(response).await
    }

    async fn read_response<Resp: DeserializeOwned>(&self, response: Response) -> AdapterResult<Resp> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| normalize::adapter_error_from_transport(&e))?;

        if !status.is_success() {
            tracing::error!("{} API error (status {}): {}", self.provider, status, body);
            return Err(normalize::adapter_error_from_status(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                "Failed to parse {} response: {}\nBody: {}",
                self.provider,
                e,
                body
            );
            normalize::malformed_response(self.provider, &e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterErrorKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, auth: Auth) -> ProviderHttpClient {
        ProviderHttpClient::new(
            ProviderKind::Runware,
            Client::new(),
            auth,
            "https://unused.invalid",
            Duration::from_secs(5),
        )
        .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn test_bearer_auth_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let value: serde_json::Value = client(&server, Auth::Bearer("secret".into()))
            .get_json("/status")
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_custom_header_auth_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("x-goog-api-key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Auth::Header {
            name: "x-goog-api-key",
            value: "key".into(),
        };
        let _: serde_json::Value = client(&server, auth)
            .post_json("/echo", &serde_json::json!({ "a": 1 }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client(&server, Auth::Bearer("k".into()))
            .get_json::<serde_json::Value>("/limited")
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::RateLimited);
        assert!(err.cause.contains("slow down"));
    }

    #[tokio::test]
    async fn test_unparseable_body_is_provider_fault() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server, Auth::Bearer("k".into()))
            .get_json::<serde_json::Value>("/garbage")
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::ProviderFault);
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        let http = ProviderHttpClient::new(
            ProviderKind::Leonardo,
            Client::new(),
            Auth::Bearer("k".into()),
            "http://127.0.0.1:1",
            Duration::from_secs(2),
        );

        let err = http.get_json::<serde_json::Value>("/x").await.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Network);
    }
}
