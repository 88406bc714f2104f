use anyhow::{anyhow, Context, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

/// PostgREST `Prefer` header values used by the stores
pub mod prefer {
    pub const RETURN_REPRESENTATION: &str = "return=representation";
    pub const IGNORE_DUPLICATES: &str = "resolution=ignore-duplicates,return=representation";
    pub const RETURN_MINIMAL: &str = "return=minimal";
}

/// Percent-encodes a value for use inside a PostgREST filter (`col=eq.{value}`)
pub fn encode_filter_value(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

/// Thin PostgREST client. Every persistent store in the workspace goes through it.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    bearer: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        let bearer = config
            .supabase_service_token
            .clone()
            .unwrap_or_else(|| config.supabase_anon_key.clone());

        Self {
            client: Client::new(),
            base_url: config.supabase_url.clone(),
            anon_key: config.supabase_anon_key.clone(),
            bearer,
        }
    }

    fn get_headers(&self, prefer: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key).context("invalid Supabase API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.bearer))
                .context("invalid Supabase bearer token")?,
        );

        if let Some(prefer) = prefer {
            headers.insert("Prefer", HeaderValue::from_str(prefer)?);
        }

        Ok(headers)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: Option<&str>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self
            .client
            .request(method, &url)
            .headers(self.get_headers(prefer)?);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        // `return=minimal` and some PATCH responses come back with an empty body
        let raw = response.text().await?;
        let body = if raw.trim().is_empty() { "[]" } else { raw.as_str() };
        let data = serde_json::from_str::<T>(body)
            .with_context(|| format!("unexpected response body from {}", url))?;
        Ok(data)
    }

    /// Request returning PostgREST rows
    pub async fn rows(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: Option<&str>,
    ) -> Result<Vec<Value>> {
        self.request::<Vec<Value>>(method, path, body, prefer).await
    }
}
