use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::events::ChatContext;
use crate::message::{ChatMessage, Rating, SessionRating, Source, de_id, de_opt_id};
use crate::options::ChatConfig;

/// Body of `POST /api/v1/chat/query`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    pub query: String,
    pub session_id: Option<String>,
    pub context: ChatContext,
    #[serde(flatten)]
    pub config: ChatConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryResponse {
    #[serde(deserialize_with = "de_id")]
    pub message_id: String,
    pub response: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub session_id: Option<String>,
}

/// A conversation as stored by the backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredSession {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    /// Owning user; absent for anonymous sessions
    #[serde(default, deserialize_with = "de_opt_id")]
    pub user: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl StoredSession {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user.as_deref() == Some(user_id)
    }
}

/// History comes back paginated, but a bare list is accepted as well
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryResponse {
    Page { results: Vec<StoredSession> },
    List(Vec<StoredSession>),
}

impl HistoryResponse {
    fn into_sessions(self) -> Vec<StoredSession> {
        match self {
            HistoryResponse::Page { results } => results,
            HistoryResponse::List(sessions) => sessions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageFeedback {
    pub message_id: String,
    pub rating: Rating,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionFeedback {
    pub session_id: String,
    pub overall_rating: SessionRating,
    pub helpfulness: SessionRating,
    pub accuracy: SessionRating,
    pub would_recommend: bool,
}

impl SessionFeedback {
    /// A single star rating stands in for every feedback dimension
    pub fn from_rating(session_id: impl Into<String>, rating: SessionRating) -> Self {
        Self {
            session_id: session_id.into(),
            overall_rating: rating,
            helpfulness: rating,
            accuracy: rating,
            would_recommend: rating.would_recommend(),
        }
    }
}

/// Backend operations the conversation manager depends on
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stored sessions for a user, newest first
    async fn history(&self, user_id: &str) -> Result<Vec<StoredSession>>;

    async fn session(&self, session_id: &str) -> Result<StoredSession>;

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse>;

    async fn message_feedback(&self, feedback: &MessageFeedback) -> Result<()>;

    async fn session_feedback(&self, feedback: &SessionFeedback) -> Result<()>;

    async fn clear_session(&self, session_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
}

/// Thin JSON client for the portfolio REST API.
///
/// Sends the bearer token when one is configured and, on a 401, refreshes it
/// once and replays the request.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    tokens: Arc<RwLock<Tokens>>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            timeout: config.request_timeout(),
            tokens: Arc::new(RwLock::new(Tokens {
                access: config.auth.access_token.clone(),
                refresh: config.auth.refresh_token.clone(),
            })),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn access_token(&self) -> Option<String> {
        self.tokens.read().await.access.clone()
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self.execute(Method::GET, path, query, None).await?;
        Self::decode(response).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let response = self.execute(Method::POST, path, &[], Some(&body)).await?;
        Self::decode(response).await
    }

    /// POST where the response body is not needed
    pub async fn post<B: Serialize>(&self, path: &str, body: Option<&B>) -> Result<()> {
        let body = body.map(serde_json::to_value).transpose()?;
        self.execute(Method::POST, path, &[], body.as_ref()).await?;
        Ok(())
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let response = self.dispatch(method.clone(), path, query, body).await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.refresh().await {
            debug!(path, "replaying request with refreshed token");
            let retried = self.dispatch(method, path, query, body).await?;
            return Self::check(retried).await;
        }

        Self::check(response).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = self.access_token().await {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| self.map_transport(e))
    }

    /// Exchange the refresh token for a new access token. Returns whether a
    /// retry is worthwhile.
    async fn refresh(&self) -> bool {
        let Some(refresh) = self.tokens.read().await.refresh.clone() else {
            return false;
        };

        let url = format!("{}/api/v1/auth/refresh", self.base_url);
        let outcome = async {
            let response = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "refresh": refresh }))
                .send()
                .await
                .map_err(|e| self.map_transport(e))?;
            let response = Self::check(response).await?;
            Self::decode::<RefreshResponse>(response).await
        }
        .await;

        let mut tokens = self.tokens.write().await;
        match outcome {
            Ok(refreshed) => {
                tokens.access = Some(refreshed.access);
                true
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, dropping credentials");
                tokens.access = None;
                tokens.refresh = None;
                false
            }
        }
    }

    fn map_transport(&self, error: reqwest::Error) -> ChatError {
        if error.is_timeout() {
            ChatError::Timeout(self.timeout.as_secs())
        } else {
            ChatError::Http(error)
        }
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ChatError::Unauthorized);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ChatError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// `ChatBackend` over the portfolio REST API
#[derive(Clone)]
pub struct HttpChatBackend {
    api: ApiClient,
}

impl HttpChatBackend {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn history(&self, user_id: &str) -> Result<Vec<StoredSession>> {
        let history: HistoryResponse = self
            .api
            .get_json("/api/v1/chat/history", &[("userId", user_id)])
            .await?;
        Ok(history.into_sessions())
    }

    async fn session(&self, session_id: &str) -> Result<StoredSession> {
        self.api
            .get_json(&format!("/api/v1/chat/session/{}", session_id), &[])
            .await
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        self.api.post_json("/api/v1/chat/query", request).await
    }

    async fn message_feedback(&self, feedback: &MessageFeedback) -> Result<()> {
        self.api
            .post("/api/v1/chat/feedback/message", Some(feedback))
            .await
    }

    async fn session_feedback(&self, feedback: &SessionFeedback) -> Result<()> {
        self.api
            .post("/api/v1/chat/feedback/session", Some(feedback))
            .await
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.api
            .post::<Value>(&format!("/api/v1/chat/session/{}/clear", session_id), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::options::{Audience, Depth, Tone};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> Config {
        Config {
            api_base_url: base_url.to_string(),
            request_timeout_secs: 1,
            ..Config::default()
        }
    }

    fn backend(config: &Config) -> HttpChatBackend {
        HttpChatBackend::new(ApiClient::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_query_sends_flattened_config() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/chat/query"))
            .and(body_json(json!({
                "query": "What technologies do you use?",
                "session_id": null,
                "context": {"project_id": 4},
                "audience": "developer",
                "depth": "short",
                "tone": "owner_voice"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "session_id": "2f0c9c64-6a8e-4a36-9d87-5f0a3c1f7c11",
                "message_id": "9b7d",
                "response": "Mostly Rust and TypeScript.",
                "sources": [{"type": "project", "title": "Folio", "url": "/projects/folio", "description": ""}],
                "response_time_ms": 420,
                "message_count": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut context = ChatContext::new();
        context.insert("project_id".into(), json!(4));
        let request = QueryRequest {
            query: "What technologies do you use?".into(),
            session_id: None,
            context,
            config: ChatConfig {
                audience: Audience::Developer,
                depth: Depth::Short,
                tone: Tone::OwnerVoice,
            },
        };

        let response = backend(&test_config(&server.uri()))
            .query(&request)
            .await
            .unwrap();
        assert_eq!(response.message_id, "9b7d");
        assert_eq!(
            response.session_id.as_deref(),
            Some("2f0c9c64-6a8e-4a36-9d87-5f0a3c1f7c11")
        );
        assert_eq!(response.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_history_reads_paginated_results() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/chat/history"))
            .and(query_param("userId", "17"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "next": null,
                "results": [{
                    "id": "s-1",
                    "user": 17,
                    "messages": [
                        {"id": "u1", "content": "hi", "is_from_user": true, "created_at": "2024-03-01T10:00:00Z"},
                        {"id": "a1", "content": "hello", "is_from_user": false, "created_at": "2024-03-01T10:00:01Z"}
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let sessions = backend(&test_config(&server.uri()))
            .history("17")
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_owned_by("17"));
        assert_eq!(sessions[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_history_accepts_bare_list() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/chat/history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 3, "messages": []}
            ])))
            .mount(&server)
            .await;

        let sessions = backend(&test_config(&server.uri()))
            .history("17")
            .await
            .unwrap();
        assert_eq!(sessions[0].id, "3");
        assert_eq!(sessions[0].user, None);
        assert!(!sessions[0].is_owned_by("17"));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/chat/feedback/message"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Message not found"))
            .mount(&server)
            .await;

        let err = backend(&test_config(&server.uri()))
            .message_feedback(&MessageFeedback {
                message_id: "m-1".into(),
                rating: Rating::Up,
            })
            .await
            .unwrap_err();
        match err {
            ChatError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "Message not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_feedback_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/chat/feedback/session"))
            .and(body_json(json!({
                "session_id": "s-9",
                "overall_rating": 4,
                "helpfulness": 4,
                "accuracy": 4,
                "would_recommend": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let feedback = SessionFeedback::from_rating("s-9", SessionRating::new(4).unwrap());
        backend(&test_config(&server.uri()))
            .session_feedback(&feedback)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_posts_to_session_path() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/chat/session/s-9/clear"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        backend(&test_config(&server.uri()))
            .clear_session("s-9")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_and_replays() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/chat/session/s-1"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/auth/refresh"))
            .and(body_json(json!({"refresh": "r-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "fresh"})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v1/chat/session/s-1"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "s-1", "user": "17", "messages": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config {
            auth: AuthConfig {
                user_id: Some("17".into()),
                access_token: Some("stale".into()),
                refresh_token: Some("r-1".into()),
            },
            ..test_config(&server.uri())
        };
        let api = ApiClient::new(&config).unwrap();
        let session = HttpChatBackend::new(api.clone())
            .session("s-1")
            .await
            .unwrap();
        assert_eq!(session.id, "s-1");
        assert_eq!(api.access_token().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_unauthorized_without_refresh_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/chat/session/s-1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = backend(&test_config(&server.uri()))
            .session("s-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/chat/query"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(json!({"message_id": "x", "response": "late"})),
            )
            .mount(&server)
            .await;

        let request = QueryRequest {
            query: "hello".into(),
            session_id: None,
            context: ChatContext::new(),
            config: ChatConfig::default(),
        };
        let err = backend(&test_config(&server.uri()))
            .query(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Timeout(1)));
    }
}
