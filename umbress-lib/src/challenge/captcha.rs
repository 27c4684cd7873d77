use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

use crate::config::CaptchaConfig;
use crate::error::{FirewallError, Result};

/// Server-side verification of a captcha response token.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync + 'static {
    async fn verify(&self, response: &str, remote_ip: IpAddr) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct SiteVerify {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Google reCAPTCHA `siteverify` client.
pub struct RecaptchaVerifier {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl RecaptchaVerifier {
    pub fn new(cfg: &CaptchaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.verify_timeout_ms))
            .build()
            .map_err(|e| FirewallError::Http(format!("Failed to build captcha client: {e}")))?;
        Ok(Self { client, url: cfg.verify_url.clone(), secret: cfg.secret_key.clone() })
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, response: &str, remote_ip: IpAddr) -> Result<bool> {
        let remote_ip = remote_ip.to_string();
        let form = serde_urlencoded::to_string([
            ("secret", self.secret.as_str()),
            ("response", response),
            ("remoteip", remote_ip.as_str()),
        ])
        .map_err(|e| FirewallError::Http(format!("Failed to encode captcha form: {e}")))?;

        let resp = self
            .client
            .post(&self.url)
            .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(|e| FirewallError::Http(format!("Captcha verification failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(FirewallError::Http(format!(
                "Captcha verification returned {}",
                resp.status()
            )));
        }
        let verdict: SiteVerify = resp
            .json()
            .await
            .map_err(|e| FirewallError::Http(format!("Invalid captcha verification body: {e}")))?;
        if !verdict.success {
            debug!(errors = ?verdict.error_codes, "Captcha response rejected");
        }
        Ok(verdict.success)
    }
}
