//! CloudStack command client
//!
//! Signs commands, unwraps the `<command>response` envelope and turns
//! the plane's async-job model into plain awaits.

use crate::config::{CloudStackConfig, PollConfig};
use crate::error::{CloudStackError, Result};
use crate::model::Named;
use crate::signing;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::time::{Instant, sleep};

const JOB_PENDING: u64 = 0;
const JOB_SUCCEEDED: u64 = 1;
const JOB_FAILED: u64 = 2;

/// A single API command and its parameters
#[derive(Debug, Clone)]
pub struct Command {
    name: &'static str,
    params: BTreeMap<String, String>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Add the parameter only when a value is present
    pub fn param_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Signed HTTP client for the command endpoint
pub struct CsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    secret: String,
    poll: PollConfig,
}

impl CsClient {
    pub fn new(config: &CloudStackConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: config.api_url.trim_end_matches('?').to_string(),
            api_key: config.api_key.clone(),
            secret: config.api_secret.clone(),
            poll: config.poll.clone(),
        })
    }

    fn url_for(&self, command: &Command) -> String {
        let mut params = command.params.clone();
        params.insert("command".to_string(), command.name.to_string());
        params.insert("apikey".to_string(), self.api_key.clone());
        params.insert("response".to_string(), "json".to_string());
        format!(
            "{}?{}",
            self.endpoint,
            signing::signed_query(&params, &self.secret)
        )
    }

    /// Issue a synchronous command and return the body of its envelope
    pub async fn execute(&self, command: &Command) -> Result<Value> {
        tracing::debug!("CloudStack: {} {:?}", command.name, command.params);

        let response = self.http.get(self.url_for(command)).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(CloudStackError::Api {
                    command: command.name.to_string(),
                    code: u32::from(status.as_u16()),
                    cs_code: None,
                    text: truncate(&text, 200),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let inner = unwrap_envelope(command.name, body);
        if let Some(code) = inner.get("errorcode").and_then(as_u64) {
            return Err(CloudStackError::Api {
                command: command.name.to_string(),
                code: code as u32,
                cs_code: inner.get("cserrorcode").and_then(as_u64).map(|c| c as u32),
                text: inner
                    .get("errortext")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        if !status.is_success() {
            return Err(CloudStackError::Api {
                command: command.name.to_string(),
                code: u32::from(status.as_u16()),
                cs_code: None,
                text: status.to_string(),
            });
        }

        Ok(inner)
    }

    /// Issue an asynchronous command and wait for its job result
    pub async fn execute_async(&self, command: &Command) -> Result<Value> {
        let accepted = self.execute(command).await?;
        let job_id = accepted
            .get("jobid")
            .and_then(Value::as_str)
            .ok_or_else(|| CloudStackError::unexpected(command.name, "no jobid in response"))?
            .to_string();

        tracing::debug!("{} queued as job {}", command.name, job_id);
        self.wait_for_job(&job_id).await
    }

    /// Poll `queryAsyncJobResult` until the job leaves the pending state
    pub async fn wait_for_job(&self, job_id: &str) -> Result<Value> {
        let started = Instant::now();
        let query = Command::new("queryAsyncJobResult").param("jobid", job_id);

        loop {
            let job = self.execute(&query).await?;
            let status = job.get("jobstatus").and_then(as_u64).unwrap_or(JOB_PENDING);
            match status {
                JOB_SUCCEEDED => {
                    return Ok(job.get("jobresult").cloned().unwrap_or(Value::Null));
                }
                JOB_FAILED => {
                    let result = job.get("jobresult").cloned().unwrap_or(Value::Null);
                    return Err(CloudStackError::JobFailed {
                        job_id: job_id.to_string(),
                        code: result
                            .get("errorcode")
                            .and_then(as_u64)
                            .or_else(|| job.get("jobresultcode").and_then(as_u64))
                            .unwrap_or(530) as u32,
                        text: result
                            .get("errortext")
                            .and_then(Value::as_str)
                            .unwrap_or("job failed")
                            .to_string(),
                    });
                }
                _ => {}
            }

            if started.elapsed() >= self.poll.timeout {
                return Err(CloudStackError::JobTimeout {
                    job_id: job_id.to_string(),
                    seconds: self.poll.timeout.as_secs(),
                });
            }
            sleep(self.poll.interval).await;
        }
    }

    /// Run a list command and decode the array stored under `key`
    ///
    /// An empty listing comes back as `{}`, which decodes to no items.
    pub async fn list<T: DeserializeOwned>(&self, command: &Command, key: &str) -> Result<Vec<T>> {
        let body = self.execute(command).await?;
        decode_list(body, key)
    }

    /// List with a server-side `name` hint, then keep the exact match
    ///
    /// The plane treats `name` as a substring filter, so the client-side
    /// comparison is what makes the lookup exact.
    pub async fn find_by_name<T: DeserializeOwned + Named>(
        &self,
        command: Command,
        key: &str,
        name: &str,
    ) -> Result<Option<T>> {
        let items: Vec<T> = self.list(&command.param("name", name), key).await?;
        Ok(items.into_iter().find(|item| item.name() == name))
    }
}

/// Pull `<command>response` out of the body
///
/// Error bodies sometimes use a different envelope name (`errorresponse`),
/// so fall back to the first `*response` key.
fn unwrap_envelope(command: &str, body: Value) -> Value {
    let key = format!("{}response", command.to_lowercase());
    match body {
        Value::Object(mut map) => {
            if let Some(inner) = map.remove(&key) {
                return inner;
            }
            let fallback = map.keys().find(|k| k.ends_with("response")).cloned();
            match fallback {
                Some(k) => map.remove(&k).unwrap_or(Value::Null),
                None => Value::Object(map),
            }
        }
        other => other,
    }
}

/// Decode `body[key]` as a list, treating a missing key as empty
pub fn decode_list<T: DeserializeOwned>(body: Value, key: &str) -> Result<Vec<T>> {
    match body.get(key) {
        Some(items) => Ok(serde_json::from_value(items.clone())?),
        None => Ok(Vec::new()),
    }
}

/// Decode `body[key]` as a single object
pub fn decode_object<T: DeserializeOwned>(command: &str, body: &Value, key: &str) -> Result<T> {
    let object = body
        .get(key)
        .ok_or_else(|| CloudStackError::unexpected(command, format!("missing '{}'", key)))?;
    Ok(serde_json::from_value(object.clone())?)
}

/// Numbers arrive as either JSON numbers or strings depending on version
fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
