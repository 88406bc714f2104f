use std::sync::Arc;
use std::time::Duration;

use shared_config::{AppConfig, MeetingLinkConfig, RemoteBackendConfig, RetryPolicy};

/// Builds configurations for tests. Backoff delays are kept tiny so retry tests stay fast.
pub struct TestConfig {
    pub telesalud_url: String,
    pub telesalud_token: String,
    pub notification_url: String,
    pub internal_host: String,
    pub public_https_url: String,
    pub public_http_url: String,
    pub webhook_token: Option<String>,
    pub api_token: Option<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            telesalud_url: String::new(),
            telesalud_token: "test-telesalud-token".to_string(),
            notification_url: "https://emr.example/telesalud/webhook".to_string(),
            internal_host: String::new(),
            public_https_url: String::new(),
            public_http_url: String::new(),
            webhook_token: None,
            api_token: None,
        }
    }
}

impl TestConfig {
    pub fn with_backend(url: &str) -> Self {
        Self {
            telesalud_url: url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn test_retry_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_ms: 0,
        }
    }

    pub fn to_backend_config(&self) -> RemoteBackendConfig {
        RemoteBackendConfig {
            base_url: self.telesalud_url.clone(),
            api_token: if self.telesalud_url.is_empty() {
                String::new()
            } else {
                self.telesalud_token.clone()
            },
            notification_url: self.notification_url.clone(),
            internal_host: self.internal_host.clone(),
            public_https_url: self.public_https_url.clone(),
            public_http_url: self.public_http_url.clone(),
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(2000),
            overall_deadline: Duration::from_secs(10),
            retry: Self::test_retry_policy(),
            webhook_token: self.webhook_token.clone(),
            ..RemoteBackendConfig::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            telesalud: self.to_backend_config(),
            meeting_links: MeetingLinkConfig::default(),
            api_token: self.api_token.clone(),
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}
