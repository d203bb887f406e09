use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::{ByteStream, ChatBackend, ChatRequest, SessionBackend};
use crate::error::{Error, Result};
use crate::observability::STREAM_TTFB;
use crate::session::{Session, SessionUpdate};

/// Default location of the chat backend's REST API.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/";
/// Default time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the chat backend.
///
/// Implements both [`SessionBackend`] and [`ChatBackend`].  Only connecting is bounded by a
/// timeout; a response body may stream for as long as the backend keeps it open.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: ReqwestClient,
    base_url: Url,
    connect_timeout: Duration,
}

impl HttpBackend {
    /// Create a new client for the backend at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_options(base_url, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(base_url: &str, connect_timeout: Option<Duration>) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::url(
                format!("{base_url} cannot be used as a base URL"),
                None,
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let connect_timeout = connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(connect_timeout)
            .default_headers(Self::default_headers())
            .build()
            .map_err(|e| {
                Error::transport(
                    format!("Failed to build HTTP client: {e}"),
                    None,
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url,
            connect_timeout,
        })
    }

    /// The base URL every endpoint is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The connect timeout in effect.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Create and return default headers for API requests.
    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// Resolve an endpoint from path segments, escaping each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::url("base URL cannot have path segments", None))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_connect() {
            Error::transport(format!("Connection error: {e}"), None, Some(Box::new(e)))
        } else if e.is_timeout() {
            Error::transport(
                format!(
                    "Request timed out after {:.1}s: {e}",
                    self.connect_timeout.as_secs_f64()
                ),
                None,
                Some(Box::new(e)),
            )
        } else {
            Error::transport(format!("Request failed: {e}"), None, Some(Box::new(e)))
        }
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        #[derive(Deserialize)]
        struct ErrorResponse {
            detail: Option<serde_json::Value>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::transport(
                    format!("Failed to read error response: {e}"),
                    Some(status_code),
                    Some(Box::new(e)),
                );
            }
        };

        let message = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.detail)
            .map(|detail| match detail {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .unwrap_or(error_body);

        Error::transport(message, Some(status_code), None)
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::process_error_response(response).await)
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {e}"),
                Some(Box::new(e)),
            )
        })
    }
}

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    title: Option<&'a str>,
}

#[derive(Deserialize)]
struct SessionEnvelope {
    session: Session,
}

#[async_trait::async_trait]
impl SessionBackend for HttpBackend {
    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let url = self.endpoint(&["sessions"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::decode(Self::check(response).await?).await
    }

    async fn create_session(&self, title_hint: Option<&str>) -> Result<Session> {
        let url = self.endpoint(&["sessions"])?;
        let response = self
            .client
            .post(url)
            .json(&CreateSessionBody { title: title_hint })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let envelope: SessionEnvelope = Self::decode(Self::check(response).await?).await?;
        Ok(envelope.session)
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&["sessions", id])?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn update_session(&self, id: &str, update: &SessionUpdate) -> Result<Session> {
        if update.is_empty() {
            return Err(Error::validation(
                "at least one of title or is_pinned must be provided",
                Some("update".to_string()),
            ));
        }
        let url = self.endpoint(&["sessions", id])?;
        let response = self
            .client
            .put(url)
            .json(update)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let envelope: SessionEnvelope = Self::decode(Self::check(response).await?).await?;
        Ok(envelope.session)
    }
}

#[async_trait::async_trait]
impl ChatBackend for HttpBackend {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        let url = self.endpoint(&["sessions", &request.session_id, "chat"])?;
        let started = Instant::now();
        let response = self
            .client
            .post(url)
            .header(
                header::ACCEPT,
                HeaderValue::from_static("text/plain, text/event-stream"),
            )
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check(response).await?;
        STREAM_TTFB.add(started.elapsed().as_secs_f64());

        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::stream_interrupted(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let client = HttpBackend::new(DEFAULT_BASE_URL).unwrap();
        assert_eq!(client.base_url().as_str(), DEFAULT_BASE_URL);
        assert_eq!(client.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);

        let client = HttpBackend::with_options(
            "https://chat.example.com/api",
            Some(Duration::from_secs(3)),
        )
        .unwrap();
        assert_eq!(client.base_url().as_str(), "https://chat.example.com/api/");
        assert_eq!(client.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(HttpBackend::new("not a url").is_err());
        assert!(HttpBackend::new("mailto:someone@example.com").is_err());
    }

    #[test]
    fn endpoints_escape_ids() {
        let client = HttpBackend::new(DEFAULT_BASE_URL).unwrap();
        assert_eq!(
            client.endpoint(&["sessions"]).unwrap().as_str(),
            "http://localhost:8000/api/sessions"
        );
        assert_eq!(
            client
                .endpoint(&["sessions", "a b/c", "chat"])
                .unwrap()
                .as_str(),
            "http://localhost:8000/api/sessions/a%20b%2Fc/chat"
        );
    }

    #[tokio::test]
    async fn empty_update_is_rejected_locally() {
        let client = HttpBackend::new(DEFAULT_BASE_URL).unwrap();
        let err = client
            .update_session("s1", &SessionUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
