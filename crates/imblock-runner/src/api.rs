//! Transport for the remote action API.
//!
//! The bridge only needs "send a request, get JSON back". [`HttpActionApi`]
//! does that over HTTP; [`ScriptedApi`] answers from an in-memory script and
//! records what was asked, for offline runs and tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

pub trait ActionApi: Send + Sync + 'static {
    /// Send one request and decode the JSON answer.
    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
    ) -> impl Future<Output = Result<JsonValue, BridgeError>> + Send;

    fn get(&self, url: &str) -> impl Future<Output = Result<JsonValue, BridgeError>> + Send {
        self.request(Method::Get, url, None)
    }
}

/// The remote API over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpActionApi {
    client: reqwest::Client,
}

impl HttpActionApi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActionApi for HttpActionApi {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, BridgeError> {
        let transport = |e: reqwest::Error| BridgeError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(transport)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(JsonValue::Null);
        }
        match serde_json::from_slice(&bytes) {
            Ok(json) => Ok(json),
            Err(e) => {
                // Some endpoints answer with plain text or image data.
                debug!(url, error = %e, "non-JSON response body");
                Ok(JsonValue::Null)
            }
        }
    }
}

/// A scripted answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Json(JsonValue),
    /// Non-success HTTP status.
    Status(u16),
    /// The server could not be reached.
    Unreachable,
}

/// A request seen by a [`ScriptedApi`].
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<JsonValue>,
}

#[derive(Default)]
struct Script {
    /// One-shot replies, consumed in order, keyed by URL fragment.
    queued: Vec<(String, VecDeque<Reply>)>,
    /// Replies repeated for every matching request.
    fixed: Vec<(String, Reply)>,
    requests: Vec<Request>,
}

/// An in-memory action API. Requests matching no script get `{}`, which the
/// bridge treats as an immediately settled action.
#[derive(Clone, Default)]
pub struct ScriptedApi {
    script: Arc<Mutex<Script>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next request whose URL contains `fragment` with `reply`.
    pub fn queue(&self, fragment: &str, reply: Reply) -> &Self {
        let mut script = self.lock();
        match script.queued.iter_mut().find(|(f, _)| f == fragment) {
            Some((_, replies)) => replies.push_back(reply),
            None => script
                .queued
                .push((fragment.to_string(), VecDeque::from([reply]))),
        }
        self
    }

    /// Answer every request whose URL contains `fragment` with `reply`,
    /// once any queued replies for it are used up.
    pub fn always(&self, fragment: &str, reply: Reply) -> &Self {
        self.lock().fixed.push((fragment.to_string(), reply));
        self
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(&self, method: Method, url: &str, body: Option<&JsonValue>) -> Reply {
        let mut script = self.lock();
        script.requests.push(Request {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });

        let queued = script
            .queued
            .iter_mut()
            .filter(|(fragment, _)| url.contains(fragment.as_str()))
            .find_map(|(_, replies)| replies.pop_front());
        if let Some(reply) = queued {
            return reply;
        }
        script
            .fixed
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Reply::Json(JsonValue::Object(Default::default())))
    }
}

impl ActionApi for ScriptedApi {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, BridgeError> {
        match self.answer(method, url, body) {
            Reply::Json(json) => Ok(json),
            Reply::Status(status) => Err(BridgeError::Status {
                url: url.to_string(),
                status,
            }),
            Reply::Unreachable => Err(BridgeError::Transport {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }
}
