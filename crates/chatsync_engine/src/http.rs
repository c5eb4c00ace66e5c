//! HTTP seam and the typed chat API.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so the engine can
//! run against `reqwest` in production and an in-memory server in tests.

use crate::config::SyncConfig;
use crate::cursor::AFTER_PARAM;
use crate::error::{SyncError, SyncResult};
use chatsync_protocol::{
    decode_batch, split_list_body, Channel, ChannelId, CreateChannelRequest, CreatedChannel,
    CreatedMessage, CurrentUser, DecodedBatch, Entity, Message, MessageId, PostMessageRequest,
    RawList, ReactionRequest, ReactionState, RenameChannelRequest, Timestamp,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// HTTP method used by the chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

/// A request relative to the API base URL.
///
/// The path is kept as raw segments; clients percent-encode each one.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Unencoded path segments, e.g. `["api", "channels", "3"]`.
    pub segments: Vec<String>,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
}

impl HttpRequest {
    fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Creates a GET request.
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::Get, segments)
    }

    /// Creates a POST request with a JSON body.
    pub fn post<I, S>(segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = Self::new(Method::Post, segments);
        request.body = Some(body);
        request
    }

    /// Creates a PATCH request with a JSON body.
    pub fn patch<I, S>(segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = Self::new(Method::Patch, segments);
        request.body = Some(body);
        request
    }

    /// Creates a DELETE request.
    pub fn delete<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::Delete, segments)
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Returns the value of a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the unencoded path, for logging.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (connection refused,
/// timeout, TLS failure). Error statuses are returned as responses.
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a request and returns the response.
    fn send(&self, request: HttpRequest)
        -> impl Future<Output = Result<HttpResponse, String>> + Send;
}

/// [`HttpClient`] backed by `reqwest`, carrying the session cookie.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    base: reqwest::Url,
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Builds a client from the engine configuration.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let base = reqwest::Url::parse(&config.base_url)
            .map_err(|e| SyncError::ValidationFailed(format!("invalid base URL: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::ValidationFailed(format!(
                "invalid base URL: {}",
                config.base_url
            )));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(cookie) = &config.session_cookie {
            let value = reqwest::header::HeaderValue::from_str(cookie)
                .map_err(|e| SyncError::ValidationFailed(format!("invalid session cookie: {e}")))?;
            headers.insert(reqwest::header::COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;

        Ok(Self { base, client })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn url_for(&self, request: &HttpRequest) -> Result<reqwest::Url, String> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| format!("cannot extend base URL {}", self.base))?
            .pop_if_empty()
            .extend(&request.segments);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let url = self.url_for(&request)?;
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Patch => self.client.patch(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Typed access to the chat REST endpoints.
pub struct ChatApi<C: HttpClient> {
    client: Arc<C>,
}

impl<C: HttpClient> Clone for ChatApi<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<C: HttpClient> ChatApi<C> {
    /// Creates an API wrapper around a client.
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn execute(&self, request: HttpRequest) -> SyncResult<Vec<u8>> {
        let method = request.method;
        let path = request.path();
        debug!(?method, %path, "sending request");

        let response = self
            .client
            .send(request)
            .await
            .map_err(SyncError::transport_retryable)?;

        if response.is_success() {
            Ok(response.body)
        } else {
            let err = SyncError::from_status(response.status, &response.body);
            debug!(?method, %path, status = response.status, error = %err, "request failed");
            Err(err)
        }
    }

    async fn execute_json(&self, request: HttpRequest) -> SyncResult<Value> {
        let body = self.execute(request).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }

    async fn execute_typed<T: DeserializeOwned>(&self, request: HttpRequest) -> SyncResult<T> {
        let value = self.execute_json(request).await?;
        serde_json::from_value(value)
            .map_err(|e| SyncError::Protocol(format!("unexpected response shape: {e}")))
    }

    async fn list<E: Entity>(
        &self,
        request: HttpRequest,
        key: &str,
        prepare: impl Fn(&mut Value),
    ) -> SyncResult<DecodedBatch<E>> {
        let body = self.execute_json(request).await?;
        let raw: RawList = split_list_body(body, key)?;
        let decoded = decode_batch::<E>(raw, prepare);
        for reason in &decoded.skipped {
            warn!(kind = ?E::KIND, %reason, "skipping malformed entity");
        }
        Ok(decoded)
    }

    /// `GET /api/channels[?after=ts]`
    pub async fn list_channels(
        &self,
        after: Option<&Timestamp>,
    ) -> SyncResult<DecodedBatch<Channel>> {
        let mut request = HttpRequest::get(["api", "channels"]);
        if let Some(after) = after {
            request = request.with_query(AFTER_PARAM, after.as_str());
        }
        self.list(request, "channels", |_| {}).await
    }

    /// `GET /api/channels/:id/messages[?after=ts]`
    pub async fn list_messages(
        &self,
        channel_id: ChannelId,
        after: Option<&Timestamp>,
    ) -> SyncResult<DecodedBatch<Message>> {
        let mut request = HttpRequest::get([
            "api".into(),
            "channels".into(),
            channel_id.to_string(),
            "messages".into(),
        ]);
        if let Some(after) = after {
            request = request.with_query(AFTER_PARAM, after.as_str());
        }
        self.list(request, "messages", Message::prepare_for(channel_id))
            .await
    }

    /// `POST /api/channels`
    pub async fn create_channel(&self, body: &CreateChannelRequest) -> SyncResult<CreatedChannel> {
        let body = serde_json::to_value(body)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        self.execute_typed(HttpRequest::post(["api", "channels"], body))
            .await
    }

    /// `PATCH /api/channels/:id`
    ///
    /// Returns the channel when the server echoes it; most servers only
    /// acknowledge.
    pub async fn rename_channel(
        &self,
        channel_id: ChannelId,
        body: &RenameChannelRequest,
    ) -> SyncResult<Option<Channel>> {
        let body = serde_json::to_value(body)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let response = self
            .execute_json(HttpRequest::patch(
                ["api".into(), "channels".into(), channel_id.to_string()],
                body,
            ))
            .await?;
        Ok(serde_json::from_value(response).ok())
    }

    /// `DELETE /api/channels/:id`
    pub async fn delete_channel(&self, channel_id: ChannelId) -> SyncResult<()> {
        self.execute(HttpRequest::delete([
            "api".into(),
            "channels".into(),
            channel_id.to_string(),
        ]))
        .await
        .map(drop)
    }

    /// `POST /api/channels/:id/messages`
    pub async fn post_message(
        &self,
        channel_id: ChannelId,
        body: &PostMessageRequest,
    ) -> SyncResult<CreatedMessage> {
        let body = serde_json::to_value(body)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let response = self
            .execute_json(HttpRequest::post(
                [
                    "api".into(),
                    "channels".into(),
                    channel_id.to_string(),
                    "messages".into(),
                ],
                body,
            ))
            .await?;
        Ok(CreatedMessage::decode(response, channel_id)?)
    }

    /// `DELETE /api/channels/:id/messages/:mid`
    pub async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> SyncResult<()> {
        self.execute(HttpRequest::delete([
            "api".into(),
            "channels".into(),
            channel_id.to_string(),
            "messages".into(),
            message_id.to_string(),
        ]))
        .await
        .map(drop)
    }

    /// `POST /api/messages/:id/reactions`
    ///
    /// Returns the server's reaction map when the response carries one.
    pub async fn react(
        &self,
        message_id: MessageId,
        body: &ReactionRequest,
    ) -> SyncResult<Option<ReactionState>> {
        let body = serde_json::to_value(body)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let response = self
            .execute_json(HttpRequest::post(
                [
                    "api".into(),
                    "messages".into(),
                    message_id.to_string(),
                    "reactions".into(),
                ],
                body,
            ))
            .await?;
        Ok(reaction_state(response))
    }

    /// `DELETE /api/messages/:id/reactions/:emoji`
    pub async fn unreact(
        &self,
        message_id: MessageId,
        emoji: &str,
    ) -> SyncResult<Option<ReactionState>> {
        let response = self
            .execute_json(HttpRequest::delete([
                "api".into(),
                "messages".into(),
                message_id.to_string(),
                "reactions".into(),
                emoji.to_string(),
            ]))
            .await?;
        Ok(reaction_state(response))
    }

    /// `POST /api/auth/logout`
    pub async fn logout(&self) -> SyncResult<()> {
        self.execute(HttpRequest::post(["api", "auth", "logout"], Value::Null))
            .await
            .map(drop)
    }

    /// `GET /api/auth/me`
    pub async fn current_user(&self) -> SyncResult<CurrentUser> {
        self.execute_typed(HttpRequest::get(["api", "auth", "me"]))
            .await
    }
}

fn reaction_state(body: Value) -> Option<ReactionState> {
    match serde_json::from_value(body) {
        Ok(state) => Some(state),
        Err(e) => {
            debug!(error = %e, "reaction response carries no reaction map");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct TestClient {
        response: Mutex<Option<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl TestClient {
        fn new(status: u16, body: Value) -> Self {
            Self {
                response: Mutex::new(Some(HttpResponse::json(status, &body))),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn unreachable() -> Self {
            Self {
                response: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for TestClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            self.response
                .lock()
                .clone()
                .ok_or_else(|| "connection refused".to_string())
        }
    }

    #[tokio::test]
    async fn list_channels_sends_cursor() {
        let api = ChatApi::new(TestClient::new(
            200,
            json!([{"id": 1, "name": "general", "created_at": "2024-05-01T12:00:00"}]),
        ));

        let after = Timestamp::parse("2024-05-01T11:00:00").unwrap();
        let decoded = api.list_channels(Some(&after)).await.unwrap();
        assert_eq!(decoded.batch.created.len(), 1);

        let requests = api.client().requests.lock();
        assert_eq!(requests[0].path(), "/api/channels");
        assert_eq!(requests[0].query_param("after"), Some("2024-05-01T11:00:00"));
    }

    #[tokio::test]
    async fn unset_cursor_sends_no_filter() {
        let api = ChatApi::new(TestClient::new(200, json!({"messages": []})));
        api.list_messages(ChannelId(4), None).await.unwrap();

        let requests = api.client().requests.lock();
        assert_eq!(requests[0].path(), "/api/channels/4/messages");
        assert!(requests[0].query.is_empty());
    }

    #[tokio::test]
    async fn status_is_mapped() {
        let api = ChatApi::new(TestClient::new(401, json!({"error": "login required"})));
        let err = api.list_channels(None).await.unwrap_err();
        assert_eq!(err, SyncError::Unauthenticated);

        let api = ChatApi::new(TestClient::new(403, json!({"error": "not the creator"})));
        let err = api.delete_channel(ChannelId(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::Forbidden(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_retryable() {
        let api = ChatApi::new(TestClient::unreachable());
        let err = api.current_user().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn malformed_body_is_protocol_error() {
        let api = ChatApi::new(TestClient::new(200, json!({"unexpected": true})));
        let err = api.list_channels(None).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[tokio::test]
    async fn unreact_keeps_emoji_as_one_segment() {
        let api = ChatApi::new(TestClient::new(200, json!({"message": "ok"})));
        let state = api.unreact(MessageId(7), "👍").await.unwrap();
        assert!(state.is_none());

        let requests = api.client().requests.lock();
        assert_eq!(requests[0].method, Method::Delete);
        assert_eq!(
            requests[0].segments,
            vec!["api", "messages", "7", "reactions", "👍"]
        );
    }

    #[test]
    fn reqwest_url_encodes_segments() {
        let client = ReqwestClient::new(&SyncConfig::new("http://localhost:5000/")).unwrap();
        let request = HttpRequest::delete(["api", "messages", "7", "reactions", "👍"])
            .with_query("after", "2024-05-01 12:00:00");
        let url = client.url_for(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api/messages/7/reactions/%F0%9F%91%8D?after=2024-05-01+12%3A00%3A00"
        );
    }
}
