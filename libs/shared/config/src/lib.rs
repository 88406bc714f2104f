use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Retry/backoff parameters for outbound calls to the telesalud backend
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            jitter_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, excluding jitter: `min(base * 2^(attempt-1), max)`
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }
}

/// Remote videoconferencing backend settings. Consumed read-only by the telehealth cell.
#[derive(Debug, Clone)]
pub struct RemoteBackendConfig {
    pub base_url: String,
    pub api_token: String,
    pub notification_url: String,
    pub days_before_expiration: u32,
    pub alternate_path_prefix: String,
    pub internal_host: String,
    pub public_https_url: String,
    pub public_http_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub overall_deadline: Duration,
    pub retry: RetryPolicy,
    pub webhook_token: Option<String>,
}

impl Default for RemoteBackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: String::new(),
            notification_url: String::new(),
            days_before_expiration: 3,
            alternate_path_prefix: "/api".to_string(),
            internal_host: String::new(),
            public_https_url: String::new(),
            public_http_url: String::new(),
            connect_timeout: Duration::from_millis(5000),
            request_timeout: Duration::from_millis(10000),
            overall_deadline: Duration::from_millis(30000),
            retry: RetryPolicy::default(),
            webhook_token: None,
        }
    }
}

impl RemoteBackendConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_token.is_empty()
    }

    pub fn rewrites_hosts(&self) -> bool {
        !self.internal_host.is_empty()
            && (!self.public_https_url.is_empty() || !self.public_http_url.is_empty())
    }
}

/// Standalone meeting-link settings used when the remote backend is absent or failing
#[derive(Debug, Clone)]
pub struct MeetingLinkConfig {
    pub provider: String,
    pub jitsi_base_url: String,
    pub doxy_me_room_url: Option<String>,
    pub doximity_room_url: Option<String>,
    pub url_template: Option<String>,
}

impl Default for MeetingLinkConfig {
    fn default() -> Self {
        Self {
            provider: "jitsi".to_string(),
            jitsi_base_url: "https://meet.jit.si".to_string(),
            doxy_me_room_url: None,
            doximity_room_url: None,
            url_template: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_token: Option<String>,
    pub telesalud: RemoteBackendConfig,
    pub meeting_links: MeetingLinkConfig,
    pub api_token: Option<String>,
    pub join_window_minutes: i64,
    pub notification_list_limit: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_service_token: None,
            telesalud: RemoteBackendConfig::default(),
            meeting_links: MeetingLinkConfig::default(),
            api_token: None,
            join_window_minutes: 120,
            notification_list_limit: 20,
            port: 3000,
        }
    }
}

fn required(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        warn!("{} not set, using empty value", name);
        String::new()
    })
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value ({}), using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = RemoteBackendConfig::default();
        let retry_defaults = RetryPolicy::default();

        let days_before_expiration = parsed(
            "TELESALUD_DAYS_BEFORE_EXPIRATION",
            defaults.days_before_expiration,
        );

        let telesalud = RemoteBackendConfig {
            base_url: required("TELESALUD_API_URL").trim_end_matches('/').to_string(),
            api_token: required("TELESALUD_API_TOKEN"),
            notification_url: required("TELESALUD_NOTIFICATION_URL"),
            days_before_expiration: if days_before_expiration == 0 {
                warn!("TELESALUD_DAYS_BEFORE_EXPIRATION must be positive, using default");
                defaults.days_before_expiration
            } else {
                days_before_expiration
            },
            alternate_path_prefix: optional("TELESALUD_ALTERNATE_PATH_PREFIX")
                .unwrap_or(defaults.alternate_path_prefix),
            internal_host: optional("TELESALUD_INTERNAL_HOST").unwrap_or_default(),
            public_https_url: optional("TELESALUD_PUBLIC_HTTPS_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            public_http_url: optional("TELESALUD_PUBLIC_HTTP_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            connect_timeout: Duration::from_millis(parsed("TELESALUD_CONNECT_TIMEOUT_MS", 5000)),
            request_timeout: Duration::from_millis(parsed("TELESALUD_REQUEST_TIMEOUT_MS", 10000)),
            overall_deadline: Duration::from_millis(parsed("TELESALUD_DEADLINE_MS", 30000)),
            retry: RetryPolicy {
                max_attempts: parsed("TELESALUD_MAX_ATTEMPTS", retry_defaults.max_attempts).max(1),
                base_delay_ms: parsed("TELESALUD_BACKOFF_BASE_MS", retry_defaults.base_delay_ms),
                max_delay_ms: parsed("TELESALUD_BACKOFF_MAX_MS", retry_defaults.max_delay_ms),
                jitter_ms: parsed("TELESALUD_BACKOFF_JITTER_MS", retry_defaults.jitter_ms),
            },
            webhook_token: optional("TELESALUD_WEBHOOK_TOKEN"),
        };

        let link_defaults = MeetingLinkConfig::default();
        let meeting_links = MeetingLinkConfig {
            provider: optional("MEETING_PROVIDER").unwrap_or(link_defaults.provider),
            jitsi_base_url: optional("JITSI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(link_defaults.jitsi_base_url),
            doxy_me_room_url: optional("DOXY_ME_ROOM_URL"),
            doximity_room_url: optional("DOXIMITY_ROOM_URL"),
            url_template: optional("MEETING_URL_TEMPLATE"),
        };

        let config = Self {
            supabase_url: required("SUPABASE_URL").trim_end_matches('/').to_string(),
            supabase_anon_key: required("SUPABASE_ANON_PUBLIC_KEY"),
            supabase_service_token: optional("SUPABASE_SERVICE_TOKEN"),
            telesalud,
            meeting_links,
            api_token: optional("TELEHEALTH_API_TOKEN"),
            join_window_minutes: parsed("JOIN_WINDOW_MINUTES", 120),
            notification_list_limit: parsed("NOTIFICATION_LIST_LIMIT", 20),
            port: parsed("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Persistence not configured - meetings and notifications will be kept in memory");
        }

        if !config.telesalud.is_configured() {
            warn!("Telesalud backend not configured - meetings will use local link generation");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn is_remote_backend_configured(&self) -> bool {
        self.telesalud.is_configured()
    }
}
