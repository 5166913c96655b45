/// HTTP client for provider calls.
/// One shared connection pool; every call carries its own timeout.
use std::time::Duration;

use super::providers::ProviderResponse;

pub struct UpstreamClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("switchboard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Sends the request and reads the whole body within the call timeout.
    /// Transport failures (connect, timeout, body read) come back as `Err`;
    /// any HTTP status, including errors, comes back as `Ok`.
    pub async fn execute(&self, request: reqwest::RequestBuilder) -> Result<ProviderResponse, String> {
        let resp = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.describe(e))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await.map_err(|e| self.describe(e))?;

        Ok(ProviderResponse {
            status,
            content_type,
            body,
        })
    }

    fn describe(&self, e: reqwest::Error) -> String {
        if e.is_timeout() {
            format!("provider call timed out after {}s", self.timeout.as_secs_f64())
        } else if e.is_connect() {
            format!("could not connect to provider: {}", e)
        } else {
            format!("provider request failed: {}", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_execute_returns_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/boom"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let upstream = UpstreamClient::new(Duration::from_secs(5)).unwrap();
        let resp = upstream
            .execute(upstream.client().get(format!("{}/boom", server.uri())))
            .await
            .unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(&resp.body[..], b"down");
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let upstream = UpstreamClient::new(Duration::from_millis(100)).unwrap();
        let err = upstream
            .execute(upstream.client().get(server.uri()))
            .await
            .unwrap_err();
        assert!(err.contains("timed out"), "{}", err);
    }
}
