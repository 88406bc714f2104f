// libs/telehealth-cell/src/services/telesalud.rs
use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use regex::Regex;
use reqwest::{header::ACCEPT, Client, Method, StatusCode, Url};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};

use shared_config::RemoteBackendConfig;

use crate::error::TelehealthError;
use crate::models::{CreateMeetingRequest, RemoteMeeting};

const VIDEOCONSULTATION_PATH: &str = "/videoconsultation";
const VIDEOCONSULTATION_DATA_PATH: &str = "/videoconsultation/data";

/// Outcome of a single HTTP exchange with the backend
#[derive(Debug)]
enum Exchange {
    Body(Value),
    // 404 that did not come from the application (no JSON envelope)
    RouteMissing,
}

/// Telesalud videoconsultation API client
///
/// Every request is authenticated with the configured bearer token, retried with
/// exponential backoff on transient failures, bounded by an overall deadline, and
/// every successful body has container-internal hostnames rewritten before it is
/// handed back.
pub struct TelesaludClient {
    client: Client,
    config: RemoteBackendConfig,
    rewriter: Option<HostRewriter>,
}

impl TelesaludClient {
    pub fn new(config: &RemoteBackendConfig) -> Result<Self, TelehealthError> {
        if config.base_url.is_empty() {
            return Err(TelehealthError::ConfigurationMissing {
                setting: "TELESALUD_API_URL".to_string(),
            });
        }
        if config.api_token.is_empty() {
            return Err(TelehealthError::ConfigurationMissing {
                setting: "TELESALUD_API_TOKEN".to_string(),
            });
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TelehealthError::Internal {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        let rewriter = if config.rewrites_hosts() {
            Some(HostRewriter::new(
                &config.internal_host,
                &config.public_https_url,
                &config.public_http_url,
            )?)
        } else {
            None
        };

        Ok(Self {
            client,
            config: config.clone(),
            rewriter,
        })
    }

    pub fn config(&self) -> &RemoteBackendConfig {
        &self.config
    }

    /// Create a videoconsultation
    /// POST {base}/videoconsultation
    #[instrument(skip(self, request), fields(appointment_id = request.appointment_id))]
    pub async fn create_meeting(
        &self,
        request: &CreateMeetingRequest,
    ) -> Result<RemoteMeeting, TelehealthError> {
        info!("Creating telesalud videoconsultation");

        let body = json!({
            "appointment_date": request.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            "days_before_expiration": request.options.days_before_expiration.get(),
            "medic_name": request.provider_name,
            "patient_name": request.patient_name,
            "patient_id": request.patient_id.to_string(),
            "extra": {
                "appointment_id": request.appointment_id,
                "notification_url": self.config.notification_url,
            },
        });

        let response = self
            .request(Method::POST, VIDEOCONSULTATION_PATH, &[], Some(&body))
            .await
            .map_err(|e| match e {
                TelehealthError::NotFound => TelehealthError::BackendRejected {
                    status: StatusCode::NOT_FOUND.as_u16(),
                    message: "videoconsultation endpoint reported not found".to_string(),
                },
                other => other,
            })?;

        let meeting = parse_created_meeting(&response)?;
        info!("Telesalud videoconsultation created: {}", meeting.backend_meeting_id);
        Ok(meeting)
    }

    /// Fetch meeting details
    /// GET {base}/videoconsultation/data?vc={id}&medic={medic}
    #[instrument(skip(self, medic_id))]
    pub async fn get_meeting(
        &self,
        backend_id: &str,
        medic_id: &str,
    ) -> Result<Map<String, Value>, TelehealthError> {
        let response = self
            .request(
                Method::GET,
                VIDEOCONSULTATION_DATA_PATH,
                &[("vc", backend_id), ("medic", medic_id)],
                None,
            )
            .await?;

        if response.get("success").and_then(Value::as_bool) == Some(false) {
            debug!("Backend reports no meeting {}", backend_id);
            return Err(TelehealthError::NotFound);
        }

        match response.get("data") {
            Some(Value::Object(data)) => Ok(data.clone()),
            Some(Value::Null) | None => Err(TelehealthError::NotFound),
            Some(_) => Err(TelehealthError::MalformedResponse {
                message: "meeting data is not an object".to_string(),
            }),
        }
    }

    /// Probe connectivity with a deliberately empty create request.
    /// Any answer from the application proves the backend is reachable: a JSON
    /// success, a validation error, an auth rejection or an enveloped 404. A 404
    /// on both route prefixes does not count.
    pub async fn test_connection(&self) -> bool {
        let probe = tokio::time::timeout(
            self.config.overall_deadline,
            self.request_with_fallback(&Method::POST, VIDEOCONSULTATION_PATH, &[], Some(&json!({}))),
        )
        .await;

        match probe {
            Ok(Ok(_)) => {
                info!("Telesalud connection test passed");
                true
            }
            Ok(Err(TelehealthError::BackendRejected { status: 400 | 422, .. })) => {
                info!("Telesalud connection test passed (validation response)");
                true
            }
            Ok(Err(TelehealthError::BackendRejected { status: 401 | 403, message })) => {
                warn!("Telesalud reachable but rejected the API token: {}", message);
                true
            }
            Ok(Err(TelehealthError::BackendRejected { status, .. })) if status != 404 => {
                info!("Telesalud connection test passed (HTTP {})", status);
                true
            }
            Ok(Err(TelehealthError::NotFound)) => {
                info!("Telesalud connection test passed (application 404)");
                true
            }
            Ok(Err(e)) => {
                warn!("Telesalud connection test failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Telesalud connection test timed out");
                false
            }
        }
    }

    /// Authenticated JSON request with retry/backoff, bounded by the overall deadline
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, TelehealthError> {
        let deadline = self.config.overall_deadline;

        match tokio::time::timeout(deadline, self.request_with_retry(&method, path, query, body)).await {
            Ok(result) => result,
            Err(_) => {
                error!("Telesalud {} {} exceeded deadline of {:?}", method, path, deadline);
                Err(TelehealthError::BackendUnavailable {
                    message: format!("deadline of {}ms exceeded", deadline.as_millis()),
                })
            }
        }
    }

    async fn request_with_retry(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, TelehealthError> {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let error = match self.request_with_fallback(method, path, query, body).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!("Telesalud {} {} failed without retry: {}", method, path, error);
                return Err(error);
            }

            if attempt >= max_attempts {
                error!(
                    "Telesalud {} {} failed after {} attempts: {}",
                    method, path, attempt, error
                );
                return Err(TelehealthError::BackendError {
                    message: format!("gave up after {} attempts: {}", attempt, error),
                });
            }

            let jitter = if policy.jitter_ms > 0 {
                rand::thread_rng().gen_range(0..policy.jitter_ms)
            } else {
                0
            };
            let delay = Duration::from_millis(policy.backoff_delay_ms(attempt) + jitter);

            warn!(
                "Telesalud {} {} attempt {}/{} failed ({}), retrying in {:?}",
                method, path, attempt, max_attempts, error, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Tries the primary path, then the alternate prefix once if the route does not exist
    async fn request_with_fallback(
        &self,
        method: &Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, TelehealthError> {
        let primary = format!("{}{}", self.config.base_url, path);
        if let Exchange::Body(value) = self.send_once(method, &primary, query, body).await? {
            return Ok(value);
        }

        let alternate = format!(
            "{}{}{}",
            self.config.base_url, self.config.alternate_path_prefix, path
        );
        warn!("Route {} not found, trying alternate {}", primary, alternate);

        match self.send_once(method, &alternate, query, body).await? {
            Exchange::Body(value) => Ok(value),
            Exchange::RouteMissing => Err(TelehealthError::BackendRejected {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("route {} not found on primary or alternate path", path),
            }),
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Exchange, TelehealthError> {
        debug!("Sending {} {}", method, url);

        let mut req = self
            .client
            .request(method.clone(), url)
            .bearer_auth(&self.config.api_token)
            .header(ACCEPT, "application/json");

        if !query.is_empty() {
            req = req.query(query);
        }

        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(|e| TelehealthError::BackendUnavailable {
            message: e.to_string(),
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TelehealthError::BackendUnavailable {
                message: format!("failed to read response body: {}", e),
            })?;

        debug!("Telesalud response: {} - {}", status, text);

        match classify_response(status, &text)? {
            Exchange::Body(value) => Ok(Exchange::Body(self.rewrite(value))),
            missing => Ok(missing),
        }
    }

    fn rewrite(&self, value: Value) -> Value {
        match &self.rewriter {
            Some(rewriter) => rewriter.rewrite_value(value),
            None => value,
        }
    }
}

fn error_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| text.chars().take(200).collect())
}

/// Maps an HTTP status and body onto the error taxonomy
fn classify_response(status: StatusCode, text: &str) -> Result<Exchange, TelehealthError> {
    if status.is_success() {
        return serde_json::from_str::<Value>(text)
            .map(Exchange::Body)
            .map_err(|e| TelehealthError::MalformedResponse {
                message: format!("invalid JSON: {}", e),
            });
    }

    if status == StatusCode::NOT_FOUND {
        return match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(envelope)) if envelope.contains_key("success") => {
                Err(TelehealthError::NotFound)
            }
            _ => Ok(Exchange::RouteMissing),
        };
    }

    if status.is_client_error() {
        return Err(TelehealthError::BackendRejected {
            status: status.as_u16(),
            message: error_message(text),
        });
    }

    if status.is_server_error() {
        return Err(TelehealthError::BackendError {
            message: format!("HTTP {}: {}", status.as_u16(), error_message(text)),
        });
    }

    Err(TelehealthError::MalformedResponse {
        message: format!("unexpected HTTP status {}", status.as_u16()),
    })
}

fn string_field(data: &Map<String, Value>, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn query_param(url: &str, name: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Accepts RFC 3339 or the backend's `YYYY-MM-DD HH:MM:SS` (UTC)
pub(crate) fn parse_backend_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Validates `{success: true, data: {id, medic_url, patient_url, ...}}`
fn parse_created_meeting(response: &Value) -> Result<RemoteMeeting, TelehealthError> {
    if response.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(TelehealthError::BackendRejected {
            status: StatusCode::OK.as_u16(),
            message: response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("backend reported failure")
                .to_string(),
        });
    }

    let data = response
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| TelehealthError::MalformedResponse {
            message: "missing data object".to_string(),
        })?;

    let missing = |field: &str| TelehealthError::MalformedResponse {
        message: format!("missing data.{}", field),
    };

    let backend_meeting_id = string_field(data, "id").ok_or_else(|| missing("id"))?;
    let provider_join_url = string_field(data, "medic_url").ok_or_else(|| missing("medic_url"))?;
    let patient_join_url = string_field(data, "patient_url").ok_or_else(|| missing("patient_url"))?;

    Ok(RemoteMeeting {
        medic_id: query_param(&provider_join_url, "medic"),
        patient_secret: query_param(&patient_join_url, "patient"),
        backend_meeting_id,
        data_url: string_field(data, "data_url"),
        valid_from: string_field(data, "valid_from").and_then(|s| parse_backend_timestamp(&s)),
        valid_to: string_field(data, "valid_to").and_then(|s| parse_backend_timestamp(&s)),
        provider_join_url,
        patient_join_url,
    })
}

// ==============================================================================
// HOST REWRITING
// ==============================================================================

/// Replaces a container-internal hostname with the public one in response strings.
/// Scheme is preserved, any port on the internal host is dropped. The host only
/// matches as a whole hostname, never inside a longer one.
pub struct HostRewriter {
    internal_host: String,
    pattern: Regex,
    public_https: String,
    public_http: String,
    public_host: String,
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}

impl HostRewriter {
    pub fn new(
        internal_host: &str,
        public_https_url: &str,
        public_http_url: &str,
    ) -> Result<Self, TelehealthError> {
        let public_https = if public_https_url.is_empty() {
            format!("https://{}", strip_scheme(public_http_url))
        } else {
            public_https_url.trim_end_matches('/').to_string()
        };
        let public_http = if public_http_url.is_empty() {
            format!("http://{}", strip_scheme(public_https_url))
        } else {
            public_http_url.trim_end_matches('/').to_string()
        };
        let public_host = strip_scheme(&public_https)
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let host = regex::escape(internal_host);
        let invalid = |e: regex::Error| TelehealthError::ConfigurationMissing {
            setting: format!("TELESALUD_INTERNAL_HOST ({})", e),
        };

        Ok(Self {
            internal_host: internal_host.to_ascii_lowercase(),
            // No lookaround in `regex`: boundaries are consumed as explicit groups
            pattern: Regex::new(&format!(
                r"(?i)(?:^|[^\w.-])(?:(?P<scheme>https?)://)?(?P<host>{}(?::\d+)?)(?:$|[^\w.-])",
                host
            ))
            .map_err(invalid)?,
            public_https,
            public_http,
            public_host,
        })
    }

    pub fn rewrite_str<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if !input.to_ascii_lowercase().contains(&self.internal_host) {
            return Cow::Borrowed(input);
        }

        let mut output = String::with_capacity(input.len());
        let mut copied = 0;
        let mut at = 0;

        while let Some(caps) = self.pattern.captures_at(input, at) {
            let Some(host) = caps.name("host") else { break };
            let (start, replacement) = match caps.name("scheme") {
                Some(scheme) if scheme.as_str().eq_ignore_ascii_case("https") => {
                    (scheme.start(), &self.public_https)
                }
                Some(scheme) => (scheme.start(), &self.public_http),
                None => (host.start(), &self.public_host),
            };

            output.push_str(&input[copied..start]);
            output.push_str(replacement);
            copied = host.end();
            // The trailing boundary may open the next match
            at = host.end();
        }

        if copied == 0 {
            return Cow::Borrowed(input);
        }
        output.push_str(&input[copied..]);
        Cow::Owned(output)
    }

    /// Rewrites every string value at any depth
    pub fn rewrite_value(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.rewrite_str(&s).into_owned()),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|item| self.rewrite_value(item)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, item)| (key, self.rewrite_value(item)))
                    .collect(),
            ),
            other => other,
        }
    }
}
