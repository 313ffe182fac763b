//! Scripted in-process transport for unit tests.

use crate::api::{ApiRequest, ApiResponse, Method, Transport};
use crate::error::SyncError;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Step {
    delay: Duration,
    result: Result<ApiResponse, SyncError>,
}

/// Replays queued responses per `(method, path)`. The last queued step for a
/// route repeats once the queue is down to one entry.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Step>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

fn route_key(method: Method, path: &str) -> String {
    format!("{method:?} {path}")
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: Method, path: &str, step: Step) {
        self.routes
            .lock()
            .unwrap()
            .entry(route_key(method, path))
            .or_default()
            .push_back(step);
    }

    pub(crate) fn respond(&self, method: Method, path: &str, status: u16, body: &Value) {
        self.respond_after(method, path, Duration::ZERO, status, body);
    }

    pub(crate) fn respond_after(
        &self,
        method: Method,
        path: &str,
        delay: Duration,
        status: u16,
        body: &Value,
    ) {
        self.push(
            method,
            path,
            Step {
                delay,
                result: Ok(ApiResponse::new(status, body.to_string())),
            },
        );
    }

    pub(crate) fn respond_text(&self, method: Method, path: &str, status: u16, body: &str) {
        self.push(
            method,
            path,
            Step {
                delay: Duration::ZERO,
                result: Ok(ApiResponse::new(status, body)),
            },
        );
    }

    pub(crate) fn fail(&self, method: Method, path: &str, err: SyncError) {
        self.push(
            method,
            path,
            Step {
                delay: Duration::ZERO,
                result: Err(err),
            },
        );
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SyncError> {
        let key = route_key(request.method, &request.path);
        self.requests.lock().unwrap().push(request);

        let step = {
            let mut routes = self.routes.lock().unwrap();
            let queue = routes.get_mut(&key);
            match queue {
                Some(q) if q.len() > 1 => q.pop_front(),
                Some(q) => q.front().cloned(),
                None => None,
            }
        };

        let Some(step) = step else {
            return Err(SyncError::Network(format!("no scripted route for {key}")));
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.result
    }
}
