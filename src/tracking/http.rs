use std::sync::OnceLock;
use std::time::Duration;

use serde_json::{Value, json};

use super::{ExperimentTracker, TrackingError, new_run_id, timestamp};

/// Bearer token sent with every tracker request when set.
pub const TRACKER_TOKEN_ENV: &str = "AUDIONET_TRACKER_TOKEN";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

fn agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .timeout_write(WRITE_TIMEOUT)
            .build()
    })
}

/// Posts run events as JSON to `<endpoint>/runs/<run_id>/events`.
pub struct HttpTracker {
    run_id: String,
    project: String,
    events_url: String,
    token: Option<String>,
}

impl HttpTracker {
    pub fn new(endpoint: &str, project: &str) -> Self {
        let run_id = new_run_id();
        let events_url = events_url(endpoint, &run_id);
        let token = std::env::var(TRACKER_TOKEN_ENV)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        Self {
            run_id,
            project: project.to_string(),
            events_url,
            token,
        }
    }

    fn post(&self, kind: &str, payload: Value) -> Result<(), TrackingError> {
        let body = json!({
            "project": self.project,
            "run_id": self.run_id,
            "kind": kind,
            "timestamp": timestamp()?,
            "payload": payload,
        });
        let mut request = agent().post(&self.events_url);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request
            .send_json(body)
            .map(|_| ())
            .map_err(|err| TrackingError::Request {
                url: self.events_url.clone(),
                message: err.to_string(),
            })
    }
}

fn events_url(endpoint: &str, run_id: &str) -> String {
    format!("{}/runs/{run_id}/events", endpoint.trim().trim_end_matches('/'))
}

impl ExperimentTracker for HttpTracker {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn log_config(&mut self, config: &Value) -> Result<(), TrackingError> {
        self.post("config", config.clone())
    }

    fn log_metric(&mut self, name: &str, value: f64, step: u64) -> Result<(), TrackingError> {
        self.post("metric", json!({"name": name, "value": value, "step": step}))
    }

    fn finish(&mut self) -> Result<(), TrackingError> {
        self.post("finish", Value::Null)
    }
}
