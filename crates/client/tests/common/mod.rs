//! In-process salt-api stand-in for integration tests.
//!
//! Serves `/login`, `/` and `/jobs/{jid}` on an ephemeral local port.
//! Replies are scripted per test and every request is counted so tests
//! can assert how many calls reached the backend.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Url;
use saltctl_client::SecretPrompt;
use serde_json::{json, Value};

pub const USERNAME: &str = "ops";
pub const PASSWORD: &str = "hunter2";
pub const TOKEN: &str = "c8d2e0f1a9b34d5e";

/// Secret prompt that always answers with the same string.
pub struct FixedPrompt(pub &'static str);

impl SecretPrompt for FixedPrompt {
    fn read_secret(&self, _prompt: &str) -> std::io::Result<String> {
        Ok(self.0.to_string())
    }
}

/// A scripted reply from the mock.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Status(StatusCode),
    /// Accept the request and never answer it.
    Hang,
}

impl Reply {
    async fn into_response(self) -> Response {
        match self {
            Reply::Json(body) => Json(body).into_response(),
            Reply::Status(status) => status.into_response(),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Request log and scripted replies shared with the handlers.
#[derive(Default)]
pub struct MockState {
    pub logins: AtomicUsize,
    pub submits: AtomicUsize,
    dispatch_reply: Mutex<Option<Reply>>,
    /// Replies per jid, served in order; the last one repeats.
    job_replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    polls: Mutex<HashMap<String, usize>>,
    submitted: Mutex<Vec<Value>>,
    auth_headers: Mutex<Vec<Option<String>>>,
    cookies: Mutex<Vec<Option<String>>>,
}

impl MockState {
    pub fn polls(&self, jid: &str) -> usize {
        self.polls.lock().unwrap().get(jid).copied().unwrap_or(0)
    }

    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.auth_headers.lock().unwrap().clone()
    }

    pub fn cookies(&self) -> Vec<Option<String>> {
        self.cookies.lock().unwrap().clone()
    }

    fn record_credentials(&self, headers: &HeaderMap) -> bool {
        let header = headers
            .get("x-auth-header")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let cookie = headers
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let authorized = header.as_deref() == Some(TOKEN)
            || cookie
                .as_deref()
                .is_some_and(|c| c.split("; ").any(|kv| kv == format!("session_id={TOKEN}")));

        self.auth_headers.lock().unwrap().push(header);
        self.cookies.lock().unwrap().push(cookie);
        authorized
    }
}

/// A running mock server.
pub struct MockSalt {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockSalt {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/login", post(login))
            .route("/", post(dispatch))
            .route("/jobs/{jid}", get(job))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn origin(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn on_dispatch(&self, reply: Reply) {
        *self.state.dispatch_reply.lock().unwrap() = Some(reply);
    }

    pub fn on_job(&self, jid: &str, replies: Vec<Reply>) {
        self.state
            .job_replies
            .lock()
            .unwrap()
            .insert(jid.to_string(), replies.into());
    }
}

/// `{"return": [<entry>]}`
pub fn envelope(entries: Vec<Value>) -> Reply {
    Reply::Json(json!({ "return": entries }))
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.logins.fetch_add(1, Ordering::SeqCst);

    if body["username"] != USERNAME || body["password"] != PASSWORD || body["eauth"] != "pam" {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    Json(json!({
        "return": [{
            "token": TOKEN,
            "start": 1704067200.0,
            "expire": 1704110400.0,
            "user": USERNAME,
            "eauth": "pam",
            "perms": [".*"]
        }]
    }))
    .into_response()
}

async fn dispatch(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.submits.fetch_add(1, Ordering::SeqCst);
    let authorized = state.record_credentials(&headers);
    state.submitted.lock().unwrap().push(body);

    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let reply = state.dispatch_reply.lock().unwrap().clone();
    reply
        .unwrap_or(Reply::Status(StatusCode::INTERNAL_SERVER_ERROR))
        .into_response()
        .await
}

async fn job(
    State(state): State<Arc<MockState>>,
    Path(jid): Path<String>,
    headers: HeaderMap,
) -> Response {
    *state.polls.lock().unwrap().entry(jid.clone()).or_default() += 1;
    if !state.record_credentials(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let reply = {
        let mut replies = state.job_replies.lock().unwrap();
        match replies.get_mut(&jid) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
    };
    reply
        .unwrap_or(Reply::Status(StatusCode::NOT_FOUND))
        .into_response()
        .await
}
