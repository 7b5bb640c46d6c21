use std::{
    convert::Infallible,
    fmt::Display,
    future::Future,
    pin::pin,
    sync::Arc,
    time::{Duration, Instant},
};

use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    service::service_fn,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful::GracefulShutdown},
};
use serde::Serialize;
use tokio::{net::TcpListener, spawn, time::sleep};
use tracing::{debug, error, info, instrument, warn, Level};

use crate::{
    apis::LLMApi,
    error::AskError,
    prompt::PromptTemplate,
    schema::{self, Answer, ErrorBody, Welcome, WELCOME_MESSAGE},
};

pub type ResponseBody = Full<Bytes>;

/// Read-only state shared by every request.
pub struct AppState<A> {
    pub template: PromptTemplate,
    pub api: A,
}

impl<A: LLMApi> AppState<A> {
    pub fn new(template: PromptTemplate, api: A) -> Self {
        Self { template, api }
    }

    /// Render the prompt for `question` and ask the model.
    #[instrument(skip_all, level = Level::DEBUG, target = "service::ask")]
    pub async fn ask(&self, question: &str) -> Result<String, AskError> {
        let messages = self.template.format_question(question)?;
        let answer = self.api.chat_completion(messages).await?;
        Ok(answer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Root,
    Ask,
    NotFound,
}

impl Route {
    fn of(path: &str) -> Self {
        match path {
            "/" => Route::Root,
            "/ask" | "/ask/" => Route::Ask,
            _ => Route::NotFound,
        }
    }

    fn allow(&self) -> &'static str {
        match self {
            Route::Root => "GET",
            Route::Ask => "POST",
            Route::NotFound => "",
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<ResponseBody> {
    let bytes = match serde_json::to_vec(body) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to serialize response body: {}", e);
            return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn plain_status(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn detail(status: StatusCode, text: &str) -> Response<ResponseBody> {
    json_response(
        status,
        &ErrorBody {
            detail: text.to_string(),
        },
    )
}

/// Allow any origin. With an `Origin` header it is echoed back so that
/// credentialed requests are accepted.
fn apply_cors(request_headers: &HeaderMap, response_headers: &mut HeaderMap) {
    match request_headers.get(header::ORIGIN) {
        Some(origin) => {
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            response_headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
            response_headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
        None => {
            response_headers.insert(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            );
        }
    }
}

fn preflight(request_headers: &HeaderMap) -> Response<ResponseBody> {
    let mut response = plain_status(StatusCode::OK);
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST"),
    );
    if let Some(requested) = request_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("600"),
    );
    response
}

async fn ask<A, B>(state: &AppState<A>, body: B) -> Response<ResponseBody>
where
    A: LLMApi,
    B: hyper::body::Body,
    B::Error: Display,
{
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read request body: {}", e);
            return detail(
                StatusCode::BAD_REQUEST,
                "There was an error parsing the body",
            );
        }
    };

    let question = match schema::parse_question(&bytes) {
        Ok(question) => question,
        Err(validation) => return json_response(StatusCode::UNPROCESSABLE_ENTITY, &validation),
    };

    match state.ask(&question.question).await {
        Ok(answer) => json_response(StatusCode::OK, &Answer { answer }),
        Err(e) => {
            error!("Error: {}", e);
            json_response(e.status(), &e.to_body())
        }
    }
}

/// Entry point for a single HTTP request.
pub async fn handle<A, B>(
    state: Arc<AppState<A>>,
    request: Request<B>,
) -> Result<Response<ResponseBody>, Infallible>
where
    A: LLMApi,
    B: hyper::body::Body,
    B::Error: Display,
{
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let route = Route::of(parts.uri.path());

    let is_preflight = parts.method == Method::OPTIONS
        && parts
            .headers
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = if is_preflight {
        preflight(&parts.headers)
    } else {
        match (route, &parts.method) {
            (Route::Root, &Method::GET) => json_response(
                StatusCode::OK,
                &Welcome {
                    message: WELCOME_MESSAGE.to_string(),
                },
            ),
            (Route::Ask, &Method::POST) => ask(&state, body).await,
            (Route::NotFound, _) => detail(StatusCode::NOT_FOUND, "Not Found"),
            (route, _) => {
                let mut response = detail(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(route.allow()));
                response
            }
        }
    };
    apply_cors(&parts.headers, response.headers_mut());

    info!(
        "{} {} {} {:.1}ms",
        parts.method,
        parts.uri.path(),
        response.status().as_u16(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(response)
}

pub(crate) const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Unwrap an accept result. Errors such as EMFILE are logged and followed by
/// a short pause so the accept loop does not spin.
pub(crate) async fn accepted_or_backoff<T>(accepted: std::io::Result<T>) -> Option<T> {
    match accepted {
        Ok(accepted) => Some(accepted),
        Err(e) => {
            warn!("accept failed: {}", e);
            sleep(ACCEPT_RETRY_DELAY).await;
            None
        }
    }
}

/// Accept connections until `shutdown` resolves, then wait up to `grace`
/// for open connections to finish their in-flight requests.
///
/// Every connection is served on its own task; HTTP/1.1 and HTTP/2 are both
/// accepted.
pub async fn serve<A, F>(
    listener: TcpListener,
    state: Arc<AppState<A>>,
    shutdown: F,
    grace: Duration,
) where
    A: LLMApi + 'static,
    F: Future<Output = ()>,
{
    let builder = auto::Builder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let mut shutdown = pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Some((stream, peer)) = accepted_or_backoff(accepted).await else {
                    continue;
                };
                let state = state.clone();
                let service =
                    service_fn(move |request: Request<Incoming>| handle(state.clone(), request));
                let connection = builder
                    .serve_connection(TokioIo::new(stream), service)
                    .into_owned();
                let connection = graceful.watch(connection);
                spawn(async move {
                    if let Err(e) = connection.await {
                        debug!("connection from {} closed with error: {}", peer, e);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }
    drop(listener);

    tokio::select! {
        _ = graceful.shutdown() => info!("All connections closed"),
        _ = sleep(grace) => warn!("Gave up waiting for open connections after {:?}", grace),
    }
}
