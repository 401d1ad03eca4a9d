use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{multipart, Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::{ApiConfig, DEFAULT_AUTH_SCHEME};
use crate::session::CredentialProvider;

pub type PostId = i64;
pub type CommentId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// No credential was available; nothing was sent.
    Unauthenticated,
    /// The server answered 401 or 403.
    Unauthorized,
    NotFound,
    Validation,
    Network,
    Server,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ApiErrorKind::Unauthenticated => "unauthenticated",
            ApiErrorKind::Unauthorized => "unauthorized",
            ApiErrorKind::NotFound => "not found",
            ApiErrorKind::Validation => "validation error",
            ApiErrorKind::Network => "network error",
            ApiErrorKind::Server => "server error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub detail: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn unauthenticated() -> Self {
        Self::new(ApiErrorKind::Unauthenticated, "you must be logged in")
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Validation, detail)
    }

    pub fn server(detail: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Server, detail)
    }

    fn from_status(status: StatusCode, body: &str) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => ApiErrorKind::Unauthorized,
            404 => ApiErrorKind::NotFound,
            400 | 409 | 422 => ApiErrorKind::Validation,
            _ => ApiErrorKind::Server,
        };
        let detail = error_detail(body).unwrap_or_else(|| status.to_string());
        Self::new(kind, detail)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::server(format!("malformed response: {err}"))
        } else {
            ApiError::new(ApiErrorKind::Network, err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub likes_count: i64,
}

impl Post {
    /// Creation date as "Month D, YYYY".
    pub fn created_label(&self) -> String {
        self.created_at.format("%B %-d, %Y").to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub post: PostId,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub likes_count: i64,
}

/// Something that can be liked. Serialises to the like request body,
/// `{"post": id}` or `{"comment": id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Post(PostId),
    Comment(CommentId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Post(id) => write!(f, "post {id}"),
            Subject::Comment(id) => write!(f, "comment {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostPage {
    pub count: u64,
    #[serde(default)]
    pub results: Vec<Post>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LikedUser {
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
}

/// Accepts both `{"results": [...]}` and a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Envelope { results: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Listing<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Listing::Envelope { results } => results,
            Listing::Bare(items) => items,
        }
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(alias = "token")]
    key: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct CommentRequest<'a> {
    post: PostId,
    content: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    None,
    /// Sent when the session has a credential, skipped otherwise.
    Optional,
    Required,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub auth_scheme: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

impl From<&ApiConfig> for ClientConfig {
    fn from(cfg: &ApiConfig) -> Self {
        Self {
            base_url: cfg.base_url.clone(),
            auth_scheme: cfg.auth_scheme.clone(),
            user_agent: cfg.user_agent.clone(),
            timeout: Some(cfg.timeout),
            http_client: None,
        }
    }
}

pub struct Client {
    credentials: Arc<dyn CredentialProvider>,
    http: HttpClient,
    user_agent: String,
    auth_scheme: String,
    base_url: Url,
}

impl Client {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        config: ClientConfig,
    ) -> anyhow::Result<Self> {
        if config.base_url.trim().is_empty() {
            anyhow::bail!("api: base url required");
        }
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };
        let auth_scheme = if config.auth_scheme.trim().is_empty() {
            DEFAULT_AUTH_SCHEME.to_string()
        } else {
            config.auth_scheme.trim().to_string()
        };

        Ok(Client {
            credentials,
            http,
            user_agent: config.user_agent,
            auth_scheme,
            base_url,
        })
    }

    pub fn list_posts(&self, page: u32, page_size: u32) -> Result<PostPage, ApiError> {
        let path = format!("posts/?page={page}&page_size={page_size}");
        let resp = self.send(Method::GET, &path, Auth::Optional, |req| req)?;
        decode(resp)
    }

    pub fn create_post(&self, post: &NewPost) -> Result<Post, ApiError> {
        let mut form = multipart::Form::new()
            .text("title", post.title.clone())
            .text("content", post.content.clone());
        if let Some(image) = post.image.as_ref() {
            form = form
                .file("image", image)
                .map_err(|err| ApiError::validation(format!("image {}: {err}", image.display())))?;
        }
        let resp = self.send(Method::POST, "posts/", Auth::Required, |req| {
            req.multipart(form)
        })?;
        decode(resp)
    }

    pub fn delete_post(&self, id: PostId) -> Result<(), ApiError> {
        let path = format!("posts/{id}/");
        self.send(Method::DELETE, &path, Auth::Required, |req| req)?;
        Ok(())
    }

    pub fn like(&self, subject: Subject) -> Result<(), ApiError> {
        self.send(Method::POST, "likes/create/", Auth::Required, |req| {
            req.json(&subject)
        })?;
        Ok(())
    }

    pub fn liked_users(&self, post: PostId) -> Result<Vec<LikedUser>, ApiError> {
        let path = format!("likes/?post={post}");
        let resp = self.send(Method::GET, &path, Auth::Optional, |req| req)?;
        decode::<Listing<LikedUser>>(resp).map(Listing::into_items)
    }

    pub fn list_comments(&self) -> Result<Vec<Comment>, ApiError> {
        let resp = self.send(Method::GET, "comments/", Auth::Optional, |req| req)?;
        decode::<Listing<Comment>>(resp).map(Listing::into_items)
    }

    pub fn create_comment(&self, post: PostId, content: &str) -> Result<Comment, ApiError> {
        let body = CommentRequest { post, content };
        let resp = self.send(Method::POST, "comments/", Auth::Required, |req| {
            req.json(&body)
        })?;
        decode(resp)
    }

    /// Exchanges a username and password for a credential.
    pub fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ApiError::validation("username and password are required"));
        }
        let body = LoginRequest { username, password };
        let resp = self.send(Method::POST, "auth/login/", Auth::None, |req| {
            req.json(&body)
        })?;
        let payload: LoginResponse = decode(resp)?;
        if payload.key.trim().is_empty() {
            return Err(ApiError::server("login response missing key"));
        }
        Ok(payload.key)
    }

    pub fn register(&self, registration: &Registration) -> Result<(), ApiError> {
        if registration.username.trim().is_empty() {
            return Err(ApiError::validation("username is required"));
        }
        if registration.password1 != registration.password2 {
            return Err(ApiError::validation("Passwords do not match"));
        }
        self.send(Method::POST, "auth/registration/", Auth::None, |req| {
            req.json(registration)
        })?;
        Ok(())
    }

    fn send(
        &self,
        method: Method,
        path: &str,
        auth: Auth,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response, ApiError> {
        let credential = match auth {
            Auth::Required => Some(
                self.credentials
                    .credential()
                    .ok_or_else(ApiError::unauthenticated)?,
            ),
            Auth::Optional => self.credentials.credential(),
            Auth::None => None,
        };

        let url = self
            .base_url
            .join(path)
            .map_err(|err| ApiError::validation(format!("invalid path {path}: {err}")))?;
        log::debug!("api: {method} {url}");

        let mut req = self.http.request(method.clone(), url);
        if !self.user_agent.is_empty() {
            req = req.header(USER_AGENT, self.user_agent.clone());
        }
        if let Some(token) = credential {
            req = req.header(AUTHORIZATION, format!("{} {}", self.auth_scheme, token));
        }
        req = build(req);

        let resp = req.send()?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().unwrap_or_default();
            let err = ApiError::from_status(status, &body);
            log::warn!("api: {method} {path} failed: {err}");
            Err(err)
        }
    }
}

fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let body = resp.text()?;
    serde_json::from_str(&body).map_err(|err| ApiError::server(format!("malformed response: {err}")))
}

const DETAIL_FIELDS: &[&str] = &[
    "detail",
    "message",
    "password1",
    "password2",
    "username",
    "email",
    "non_field_errors",
    "title",
    "content",
    "image",
    "post",
    "comment",
];

/// Pulls the first human-readable message out of an error body.
fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Some(trimmed.chars().take(200).collect());
    };
    match &value {
        Value::Object(map) => {
            for field in DETAIL_FIELDS {
                if let Some(message) = map.get(*field).and_then(first_message) {
                    return Some(match *field {
                        "detail" | "message" | "non_field_errors" => message,
                        _ => format!("{field}: {message}"),
                    });
                }
            }
            map.iter()
                .find_map(|(field, v)| first_message(v).map(|m| format!("{field}: {m}")))
        }
        other => first_message(other),
    }
}

fn first_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(first_message),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_body_is_keyed_by_subject_type() {
        assert_eq!(
            serde_json::to_string(&Subject::Post(7)).unwrap(),
            r#"{"post":7}"#
        );
        assert_eq!(
            serde_json::to_string(&Subject::Comment(99)).unwrap(),
            r#"{"comment":99}"#
        );
    }

    #[test]
    fn post_page_decodes_server_shape() {
        let body = r#"{
            "count": 11,
            "next": "http://127.0.0.1:8000/api/posts/?page=2",
            "results": [{
                "id": 42,
                "author": "bob",
                "title": "Hello",
                "content": "First post",
                "image": null,
                "created_at": "2024-03-05T10:00:00Z",
                "likes_count": 3
            }]
        }"#;
        let page: PostPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.count, 11);
        assert_eq!(page.results[0].id, 42);
        assert_eq!(page.results[0].likes_count, 3);
        assert_eq!(page.results[0].created_label(), "March 5, 2024");
    }

    #[test]
    fn comments_accept_bare_array() {
        let listing: Listing<Comment> =
            serde_json::from_str(r#"[{"id": 1, "post": 7, "author": "a", "content": "x"}]"#)
                .unwrap();
        let comments = listing.into_items();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].likes_count, 0);
    }

    #[test]
    fn field_errors_become_detail() {
        assert_eq!(
            error_detail(r#"{"password1": ["This password is too short."]}"#).as_deref(),
            Some("password1: This password is too short.")
        );
        assert_eq!(
            error_detail(r#"{"detail": "Invalid token."}"#).as_deref(),
            Some("Invalid token.")
        );
        assert_eq!(error_detail("").as_deref(), None);
    }

    #[test]
    fn password_errors_are_reported_before_others() {
        let body = r#"{
            "non_field_errors": ["The two password fields didn't match."],
            "email": ["Enter a valid email address."],
            "password1": ["This password is too common."]
        }"#;
        assert_eq!(
            error_detail(body).as_deref(),
            Some("password1: This password is too common.")
        );
        assert_eq!(
            error_detail(r#"{"username": ["taken"], "non_field_errors": ["nope"]}"#).as_deref(),
            Some("username: taken")
        );
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(
            ApiError::from_status(StatusCode::FORBIDDEN, "").kind,
            ApiErrorKind::Unauthorized
        );
        assert_eq!(
            ApiError::from_status(StatusCode::BAD_REQUEST, "{}").kind,
            ApiErrorKind::Validation
        );
        assert_eq!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "").kind,
            ApiErrorKind::Server
        );
    }
}
