//! In-process stand-in for an OpenAI-compatible chat-completions endpoint.
//!
//! Used by the `mock_server` binary and by tests that need a real socket.

use std::{
    convert::Infallible,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
};

use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    service::service_fn,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use rand::{seq::SliceRandom, Rng};
use serde_json::{json, Value};
use tokio::{net::TcpListener, spawn, task::JoinHandle};
use tracing::{debug, info};

use crate::service::accepted_or_backoff;

pub const COMPLETIONS_PATH: &str = "/openai/v1/chat/completions";

const OPENERS: &[&str] = &[
    "Sure.",
    "Good question.",
    "Here is a short answer.",
    "Happy to help.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MockMode {
    /// Answer every request.
    Normal = 0,
    /// Reply 500 with an OpenAI-style error body.
    Fail = 1,
    /// Reply 200 with an empty `choices` list.
    Empty = 2,
}

impl MockMode {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MockMode::Fail,
            2 => MockMode::Empty,
            _ => MockMode::Normal,
        }
    }
}

#[derive(Default)]
struct MockState {
    mode: AtomicU8,
    requests: Mutex<Vec<Value>>,
}

pub struct MockCompletionServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockCompletionServer {
    pub async fn start(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState::default());
        let handle = spawn(accept_loop(listener, state.clone()));
        info!("Mock completion server listening on {}", addr);
        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Value for `GroqConfig::base_url`.
    pub fn base_url(&self) -> String {
        format!("http://{}/openai/v1", self.addr)
    }

    pub fn set_mode(&self, mode: MockMode) {
        self.state.mode.store(mode as u8, Ordering::Relaxed);
    }

    /// Bodies of every completion request received so far.
    pub fn requests(&self) -> Vec<Value> {
        match self.state.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Wait for the accept loop; it only ends when the task is aborted.
    pub async fn join(mut self) {
        let _ = (&mut self.handle).await;
    }
}

impl Drop for MockCompletionServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<MockState>) {
    loop {
        let Some((stream, peer)) = accepted_or_backoff(listener.accept().await).await else {
            continue;
        };
        let state = state.clone();
        spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(respond(&state, request).await) }
            });
            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("mock connection from {} closed: {}", peer, e);
            }
        });
    }
}

fn json_response(status: StatusCode, value: Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn api_error(status: StatusCode, message: &str, kind: &str) -> Response<Full<Bytes>> {
    json_response(
        status,
        json!({"error": {"message": message, "type": kind}}),
    )
}

fn has_bearer(request: &Request<Incoming>) -> bool {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !token.trim().is_empty())
}

/// The assistant reply for the last `user` message of a request.
pub fn mock_reply(request: &Value) -> String {
    let question = request["messages"]
        .as_array()
        .and_then(|messages| messages.iter().rev().find(|m| m["role"] == "user"))
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();
    let opener = OPENERS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("Sure.");
    format!("{} You asked: \"{}\"", opener, question)
}

async fn respond(state: &MockState, request: Request<Incoming>) -> Response<Full<Bytes>> {
    if request.method() != Method::POST || request.uri().path() != COMPLETIONS_PATH {
        return api_error(
            StatusCode::NOT_FOUND,
            "Unknown request URL",
            "invalid_request_error",
        );
    }
    if !has_bearer(&request) {
        return api_error(
            StatusCode::UNAUTHORIZED,
            "Invalid API Key",
            "invalid_request_error",
        );
    }

    let bytes = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                &e.to_string(),
                "invalid_request_error",
            )
        }
    };
    let body: Value = match serde_json::from_slice(&bytes) {
        Ok(body) => body,
        Err(e) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                &format!("invalid JSON body: {}", e),
                "invalid_request_error",
            )
        }
    };
    if let Ok(mut requests) = state.requests.lock() {
        requests.push(body.clone());
    }

    match MockMode::from_u8(state.mode.load(Ordering::Relaxed)) {
        MockMode::Fail => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "The server had an error while processing your request",
            "internal_server_error",
        ),
        MockMode::Empty => json_response(StatusCode::OK, completion(&body, None)),
        MockMode::Normal => {
            let reply = mock_reply(&body);
            json_response(StatusCode::OK, completion(&body, Some(reply)))
        }
    }
}

fn completion(request: &Value, reply: Option<String>) -> Value {
    let id = format!("chatcmpl-{:016x}", rand::thread_rng().gen::<u64>());
    let choices = match reply {
        Some(content) => json!([{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }]),
        None => json!([]),
    };
    json!({
        "id": id,
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": request["model"],
        "choices": choices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apis::{GroqApi, GroqConfig, LLMApi, LlmError},
        prompt::{ChatMessage, PromptTemplate},
    };

    async fn mock() -> MockCompletionServer {
        MockCompletionServer::start("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    fn api(mock: &MockCompletionServer, key: &str) -> GroqApi {
        let mut config = GroqConfig::new(key);
        config.base_url = mock.base_url();
        GroqApi::new(config).unwrap()
    }

    #[test]
    fn test_mock_reply_uses_last_user_turn() {
        let request = json!({"messages": [
            {"role": "system", "content": "sys"},
            {"role": "user", "content": "first"},
            {"role": "user", "content": "second"},
        ]});
        assert!(mock_reply(&request).ends_with("You asked: \"second\""));
    }

    #[tokio::test]
    async fn test_groq_api_against_mock() {
        let mock = mock().await;
        let api = api(&mock, "gsk_test");
        let messages = PromptTemplate::default().format_question("ping?").unwrap();
        let answer = api.chat_completion(messages).await.unwrap();
        assert!(!answer.is_empty());
        assert!(answer.contains("ping?"));

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["model"], "mixtral-8x7b-32768");
        assert_eq!(requests[0]["stream"], false);
        assert_eq!(requests[0]["messages"].as_array().unwrap().len(), 2);
        assert_eq!(requests[0]["messages"][1]["content"], "ping?");
    }

    #[tokio::test]
    async fn test_failure_modes() {
        let mock = mock().await;
        let api = api(&mock, "gsk_test");

        mock.set_mode(MockMode::Fail);
        let err = api
            .chat_completion(vec![ChatMessage::user("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 500, .. }));

        mock.set_mode(MockMode::Empty);
        let err = api
            .chat_completion(vec![ChatMessage::user("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let mock = mock().await;
        let err = api(&mock, "")
            .chat_completion(vec![ChatMessage::user("x")])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "API error (401): Invalid API Key");
        assert!(mock.requests().is_empty());
    }
}
