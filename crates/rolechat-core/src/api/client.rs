//! API client for the rolechat backend.
//!
//! Every request goes through one pipeline: the bearer token is attached on
//! the way out, and an HTTP 401 on the way back tears the session down and
//! sends the user to the login page.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

use crate::auth::SessionState;
use crate::models::{
    Character, CharacterList, CharacterQuery, CharacterUpdate, Conversation, ConversationList,
    ConversationQuery, LoginCredentials, LoginResponse, MessageList, NewCharacter,
    NewConversation, NewUser, PageQuery, RegisterResponse, SuccessResponse, UserProfile,
};
use crate::router::Navigator;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Path of the login page; 401 responses send the user here.
pub const LOGIN_PATH: &str = "/login";

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

const USER_AGENT: &str = concat!("rolechat/", env!("CARGO_PKG_VERSION"));

/// API client for the rolechat backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: SessionState,
    navigator: Arc<dyn Navigator>,
}

fn build_http_client(user_agent: &str, timeout: Duration) -> Result<Client, ApiError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

    Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(ApiError::ClientBuild)
}

impl ApiClient {
    /// Create a client bound to the shared session and the host navigator.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        session: SessionState,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiError> {
        let client = build_http_client(USER_AGENT, timeout)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            navigator,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Outbound interception: attach the stored bearer token, if any.
    ///
    /// The token is read from the credential store rather than the in-memory
    /// session; write-through keeps the two identical.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.session.store().read_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Inbound interception: classify the response and react to 401.
    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Network error");
                return Err(ApiError::Network(e));
            }
        };

        let status = response.status();
        let url = response.url().path().to_string();
        debug!(%status, url = %url, "Response received");

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.handle_unauthorized();
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let text = response.text().await.map_err(|e| {
            error!(error = %e, "Network error while reading response body");
            ApiError::Network(e)
        })?;
        let body = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    fn handle_unauthorized(&self) {
        warn!("Received 401, clearing session");
        self.session.clear_auth();

        let current = self.navigator.current_path();
        if !current.contains(LOGIN_PATH) {
            self.navigator.hard_navigate(LOGIN_PATH);
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(self.request(Method::GET, path)).await
    }

    async fn get_with_query<T: DeserializeOwned, Q: Serialize>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, ApiError> {
        self.execute(self.request(Method::GET, path).query(query)).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.execute(self.request(Method::POST, path).json(body)).await
    }

    async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.execute(self.request(Method::PUT, path).json(body)).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(self.request(Method::DELETE, path)).await
    }

    // ===== Auth =====

    pub async fn register(&self, user: &NewUser) -> Result<RegisterResponse, ApiError> {
        self.post("/auth/register", user).await
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResponse, ApiError> {
        self.post("/auth/login", credentials).await
    }

    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.get("/auth/me").await
    }

    pub async fn logout(&self) -> Result<SuccessResponse, ApiError> {
        self.execute(self.request(Method::POST, "/auth/logout")).await
    }

    /// Token renewal at a deployment-specific endpoint
    pub async fn refresh_token(&self, path: &str) -> Result<LoginResponse, ApiError> {
        self.execute(self.request(Method::POST, path)).await
    }

    // ===== Characters =====

    pub async fn characters(&self, query: &CharacterQuery) -> Result<CharacterList, ApiError> {
        self.get_with_query("/characters", query).await
    }

    pub async fn character(&self, id: &str) -> Result<Character, ApiError> {
        self.get(&format!("/characters/{}", id)).await
    }

    pub async fn create_character(&self, character: &NewCharacter) -> Result<Character, ApiError> {
        self.post("/characters", character).await
    }

    pub async fn update_character(
        &self,
        id: &str,
        update: &CharacterUpdate,
    ) -> Result<Character, ApiError> {
        self.put(&format!("/characters/{}", id), update).await
    }

    pub async fn delete_character(&self, id: &str) -> Result<SuccessResponse, ApiError> {
        self.delete(&format!("/characters/{}", id)).await
    }

    pub async fn my_characters(&self, page: &PageQuery) -> Result<CharacterList, ApiError> {
        self.get_with_query("/characters/my/list", page).await
    }

    // ===== Conversations =====

    pub async fn conversations(&self, query: &ConversationQuery) -> Result<ConversationList, ApiError> {
        self.get_with_query("/conversations", query).await
    }

    pub async fn conversation(&self, id: &str) -> Result<Conversation, ApiError> {
        self.get(&format!("/conversations/{}", id)).await
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<SuccessResponse, ApiError> {
        self.delete(&format!("/conversations/{}", id)).await
    }

    pub async fn update_conversation_summary(
        &self,
        id: &str,
        summary: &str,
    ) -> Result<SuccessResponse, ApiError> {
        self.put(
            &format!("/conversations/{}/summary", id),
            &serde_json::json!({ "summary": summary }),
        )
        .await
    }

    // ===== Messages =====

    pub async fn create_conversation(&self, conversation: &NewConversation) -> Result<Conversation, ApiError> {
        self.post("/messages/conversations", conversation).await
    }

    pub async fn messages(&self, conversation_id: &str, page: &PageQuery) -> Result<MessageList, ApiError> {
        self.get_with_query(
            &format!("/messages/conversations/{}/messages", conversation_id),
            page,
        )
        .await
    }

    pub async fn delete_message(&self, id: &str) -> Result<SuccessResponse, ApiError> {
        self.delete(&format!("/messages/{}", id)).await
    }
}
