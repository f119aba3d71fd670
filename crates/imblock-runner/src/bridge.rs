//! Action bridge: turns suspended primitive calls into remote actions.
//!
//! Every async primitive runs as its own tokio task. Remote actions follow the
//! create-then-poll protocol: the first response carries `href` and `status`,
//! and the bridge re-fetches `href` every poll interval while the status is
//! `pending` or `running`. Failures never escape the task; they come back as
//! [`Resolution::Failed`] so the program can keep going.

use std::sync::Arc;
use std::time::Duration;

use imblock_eval::{AsyncCall, DeviceCall, FocusKind, Value};
use serde_json::{json, Value as JsonValue};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ActionApi, Method};
use crate::config::RunnerConfig;
use crate::error::BridgeError;

const AUTOFOCUS_EXTENSION: &str = "extensions/org.openflexure.autofocus";
const POSITION_PROPERTY: &str = "instrument/state/stage/position";

/// Progress of one in-flight action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// How an action settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Completed(Value),
    Failed(String),
}

/// A remote action request: `GET`/`POST` `<base>/<path>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<JsonValue>,
}

impl ActionRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Where a device call is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// A property read: one `GET <base>/<prefix>/<path>`.
    Property(&'static str),
    /// A create-then-poll action.
    Action(ActionRequest),
}

/// An action started by [`ActionBridge::spawn`]. Dropping it aborts the task;
/// requests already sent are not retracted.
pub struct PendingAction {
    call: AsyncCall,
    status: watch::Receiver<ActionStatus>,
    result: oneshot::Receiver<Resolution>,
    task: JoinHandle<()>,
}

impl PendingAction {
    pub fn call(&self) -> &AsyncCall {
        &self.call
    }

    pub fn status(&self) -> ActionStatus {
        *self.status.borrow()
    }

    /// The resolution, once the task has produced one.
    pub fn try_resolve(&mut self) -> Option<Resolution> {
        match self.result.try_recv() {
            Ok(resolution) => Some(resolution),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Resolution::Failed(
                "action task ended without a result".to_string(),
            )),
        }
    }
}

impl Drop for PendingAction {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct ActionBridge<A> {
    api: Arc<A>,
    base_url: String,
    property_prefix: String,
    positioner_name: String,
    poll_interval: Duration,
    max_polls: Option<u32>,
}

impl<A> Clone for ActionBridge<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            base_url: self.base_url.clone(),
            property_prefix: self.property_prefix.clone(),
            positioner_name: self.positioner_name.clone(),
            poll_interval: self.poll_interval,
            max_polls: self.max_polls,
        }
    }
}

impl<A: ActionApi> ActionBridge<A> {
    pub fn new(api: A, config: &RunnerConfig) -> Self {
        Self {
            api: Arc::new(api),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            property_prefix: config.property_prefix.trim_matches('/').to_string(),
            positioner_name: config.positioner_name.clone(),
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
        }
    }

    /// Start `call` in the background and return immediately.
    pub fn spawn(&self, call: AsyncCall) -> PendingAction {
        let (status_tx, status) = watch::channel(ActionStatus::Pending);
        let (result_tx, result) = oneshot::channel();
        let bridge = self.clone();
        let task_call = call.clone();

        let task = tokio::spawn(async move {
            status_tx.send_replace(ActionStatus::Running);
            let resolution = match bridge.perform(&task_call).await {
                Ok(value) => {
                    info!(call = %task_call, "action completed");
                    status_tx.send_replace(ActionStatus::Completed);
                    Resolution::Completed(value)
                }
                Err(e) => {
                    warn!(call = %task_call, error = %e, "action failed");
                    status_tx.send_replace(ActionStatus::Failed);
                    Resolution::Failed(e.to_string())
                }
            };
            let _ = result_tx.send(resolution);
        });

        PendingAction {
            call,
            status,
            result,
            task,
        }
    }

    /// Carry out one primitive call and produce the value it returns.
    pub async fn perform(&self, call: &AsyncCall) -> Result<Value, BridgeError> {
        let device = match call {
            AsyncCall::Wait { seconds } => {
                tokio::time::sleep(Duration::from_secs_f64(*seconds)).await;
                return Ok(Value::Null);
            }
            AsyncCall::Device(device) => device,
        };

        let request = match self.route(device) {
            Route::Property(path) => {
                let reply = self.get_property(path).await?;
                return match device {
                    DeviceCall::GetPosition { axis } => reply
                        .get(axis.as_lower())
                        .cloned()
                        .map(Value::from)
                        .ok_or_else(|| BridgeError::missing(path, axis.as_lower())),
                    _ => Ok(Value::from(reply)),
                };
            }
            Route::Action(request) => request,
        };

        let payload = self.do_action(&request).await?;
        match device {
            DeviceCall::SharpnessMetric => payload
                .get("output")
                .and_then(|output| output.get("sharpness"))
                .or_else(|| payload.get("sharpness"))
                .cloned()
                .map(Value::from)
                .ok_or_else(|| BridgeError::missing(request.path, "sharpness")),
            _ => Ok(Value::from(payload)),
        }
    }

    /// Read a property: a single `GET <base>/<prefix>/<path>`.
    pub async fn get_property(&self, path: &str) -> Result<JsonValue, BridgeError> {
        let url = format!("{}/{}/{}", self.base_url, self.property_prefix, path);
        debug!(url = %url, "reading property");
        self.api.get(&url).await
    }

    /// Start an action and poll it until it settles; returns the final payload.
    pub async fn do_action(&self, request: &ActionRequest) -> Result<JsonValue, BridgeError> {
        let url = format!("{}/{}", self.base_url, request.path);
        debug!(url = %url, method = ?request.method, "starting action");
        let mut reply = self
            .api
            .request(request.method, &url, request.body.as_ref())
            .await?;

        let mut polls = 0;
        loop {
            match reply.get("status").and_then(JsonValue::as_str) {
                Some("pending" | "running") => {}
                Some(status @ ("failed" | "error" | "cancelled")) => {
                    return Err(BridgeError::ActionFailed {
                        path: request.path.clone(),
                        status: status.to_string(),
                    });
                }
                // No status, or a terminal one: settled.
                _ => return Ok(reply),
            }

            if self.max_polls.is_some_and(|max| polls >= max) {
                return Err(BridgeError::Timeout {
                    path: request.path.clone(),
                    polls,
                });
            }
            let href = reply
                .get("href")
                .and_then(JsonValue::as_str)
                .map(|href| self.absolute(href))
                .ok_or_else(|| BridgeError::missing(&request.path, "href"))?;

            tokio::time::sleep(self.poll_interval).await;
            polls += 1;
            debug!(href = %href, polls, "polling action");
            reply = self.api.get(&href).await?;
        }
    }

    fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}/{}", self.base_url, href.trim_start_matches('/'))
        }
    }

    /// Where a device call goes.
    pub fn route(&self, call: &DeviceCall) -> Route {
        let request = match call {
            DeviceCall::Capture => ActionRequest::get("CommunicationChannel/acquireImage"),
            DeviceCall::MoveStage { axis, mode, amount } => ActionRequest::get(format!(
                "PositionerController/movePositioner?positionerName={}&axis={}&dist={}&isAbsolute={}",
                self.positioner_name,
                axis.as_upper(),
                Value::Number(*amount).to_string_value(),
                mode.is_absolute()
            )),
            DeviceCall::MoveStage3d { mode, x, y, z } => ActionRequest::post(
                "actions/stage/move",
                json!({ "absolute": mode.is_absolute(), "x": x, "y": y, "z": z }),
            ),
            DeviceCall::Autofocus { kind } => match kind {
                FocusKind::Fast => ActionRequest::post(
                    format!("{}/fast_autofocus", AUTOFOCUS_EXTENSION),
                    json!({ "dz": 2000 }),
                ),
                FocusKind::Medium => ActionRequest::post(
                    format!("{}/autofocus", AUTOFOCUS_EXTENSION),
                    json!({ "dz": sweep(90, 30) }),
                ),
                FocusKind::Fine => ActionRequest::post(
                    format!("{}/autofocus", AUTOFOCUS_EXTENSION),
                    json!({ "dz": sweep(30, 10) }),
                ),
            },
            DeviceCall::SharpnessMetric => ActionRequest::post(
                format!("{}/measure_sharpness", AUTOFOCUS_EXTENSION),
                json!({}),
            ),
            // Positions are read as a property, not polled.
            DeviceCall::GetPosition { .. } => return Route::Property(POSITION_PROPERTY),
        };
        Route::Action(request)
    }
}

/// `-range..=range` in steps of `step`.
fn sweep(range: i64, step: usize) -> Vec<i64> {
    (-range..=range).step_by(step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Reply, ScriptedApi};
    use imblock_eval::{Axis, MoveMode};

    fn bridge(api: &ScriptedApi) -> ActionBridge<ScriptedApi> {
        let config = RunnerConfig {
            base_url: "http://scope".to_string(),
            max_polls: Some(3),
            ..RunnerConfig::default()
        };
        ActionBridge::new(api.clone(), &config)
    }

    fn running(href: &str) -> Reply {
        Reply::Json(json!({ "href": href, "status": "running" }))
    }

    #[test]
    fn test_autofocus_sweeps() {
        assert_eq!(sweep(90, 30), vec![-90, -60, -30, 0, 30, 60, 90]);
        assert_eq!(sweep(30, 10).len(), 7);
    }

    #[test]
    fn test_move_route() {
        let api = ScriptedApi::new();
        let route = bridge(&api).route(&DeviceCall::MoveStage {
            axis: Axis::X,
            mode: MoveMode::Absolute,
            amount: 100.0,
        });
        let Route::Action(request) = route else {
            panic!("expected an action, got {:?}", route);
        };
        assert_eq!(request.method, Method::Get);
        assert_eq!(
            request.path,
            "PositionerController/movePositioner?positionerName=ESP32Stage&axis=X&dist=100&isAbsolute=true"
        );
    }

    #[test]
    fn test_position_is_a_property_read() {
        let api = ScriptedApi::new();
        assert_eq!(
            bridge(&api).route(&DeviceCall::GetPosition { axis: Axis::Y }),
            Route::Property("instrument/state/stage/position")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_settled() {
        let api = ScriptedApi::new();
        api.queue("acquireImage", running("/tasks/7"))
            .queue("tasks/7", running("/tasks/7"))
            .queue("tasks/7", Reply::Json(json!({ "status": "completed", "output": 1 })));

        let start = tokio::time::Instant::now();
        let payload = bridge(&api)
            .do_action(&ActionRequest::get("CommunicationChannel/acquireImage"))
            .await
            .unwrap();

        assert_eq!(payload["output"], 1);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        let urls: Vec<String> = api.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "http://scope/CommunicationChannel/acquireImage",
                "http://scope/tasks/7",
                "http://scope/tasks/7",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_is_an_error() {
        let api = ScriptedApi::new();
        api.queue("acquireImage", running("http://scope/tasks/1"))
            .queue("tasks/1", Reply::Json(json!({ "status": "failed" })));
        let err = bridge(&api)
            .do_action(&ActionRequest::get("CommunicationChannel/acquireImage"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ActionFailed { ref status, .. } if status == "failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_limit() {
        let api = ScriptedApi::new();
        api.always("acquireImage", running("/tasks/2"))
            .always("tasks/2", running("/tasks/2"));
        let err = bridge(&api)
            .do_action(&ActionRequest::get("CommunicationChannel/acquireImage"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { polls: 3, .. }));
        assert_eq!(api.requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sharpness_and_position() {
        let api = ScriptedApi::new();
        api.queue(
            "measure_sharpness",
            Reply::Json(json!({ "status": "completed", "output": { "sharpness": 12.5 } })),
        )
        .always(POSITION_PROPERTY, Reply::Json(json!({ "x": 10, "y": 20, "z": -3 })));
        let bridge = bridge(&api);

        let sharpness = bridge
            .perform(&AsyncCall::Device(DeviceCall::SharpnessMetric))
            .await
            .unwrap();
        assert_eq!(sharpness, Value::Number(12.5));

        let z = bridge
            .perform(&AsyncCall::Device(DeviceCall::GetPosition { axis: Axis::Z }))
            .await
            .unwrap();
        assert_eq!(z, Value::Number(-3.0));
        assert_eq!(
            api.requests()[1].url,
            "http://scope/api/v2/instrument/state/stage/position"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_failure_resolves_instead_of_raising() {
        let api = ScriptedApi::new();
        api.queue("acquireImage", Reply::Status(500));
        let mut pending = bridge(&api).spawn(AsyncCall::Device(DeviceCall::Capture));
        assert!(pending.try_resolve().is_none());

        tokio::time::sleep(Duration::from_millis(1)).await;
        match pending.try_resolve() {
            Some(Resolution::Failed(message)) => assert!(message.contains("500"), "{}", message),
            other => panic!("unexpected resolution {:?}", other),
        }
        assert_eq!(pending.status(), ActionStatus::Failed);
    }
}
