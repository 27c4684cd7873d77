//! Two-step cookie challenges.
//!
//! Both kinds share one engine. A client is first handed a puzzle cookie and a holding
//! page; solving the puzzle earns a clearance cookie. A clearance is honored only when the
//! `(puzzle, clearance)` pair equals the one recorded for the source after it solved that
//! exact puzzle, so self-made or swapped cookies are re-challenged.

mod captcha;
mod cookie;
mod engine;
mod page;
mod pow;
mod token;

pub use captcha::{CaptchaVerifier, RecaptchaVerifier};
pub(crate) use cookie::cookie_domain;
pub use cookie::{parse_cookies, SetCookie};
pub use engine::{Challenge, ChallengeOutcome};
pub use pow::solve;
pub use token::ChallengeToken;
pub(crate) use token::unix_now;

use http::StatusCode;
use serde::Deserialize;

/// Challenge flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeKind {
    /// Computational browser check.
    Automated,
    /// reCAPTCHA check.
    Captcha,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Automated => "automated",
            ChallengeKind::Captcha => "captcha",
        }
    }

    /// Cookie carrying the puzzle id.
    pub fn puzzle_cookie(&self) -> &'static str {
        match self {
            ChallengeKind::Automated => "__umbuuid",
            ChallengeKind::Captcha => "__umb_rcptch",
        }
    }

    /// Cookie carrying the clearance id.
    pub fn clearance_cookie(&self) -> &'static str {
        match self {
            ChallengeKind::Automated => "__umb_clearance",
            ChallengeKind::Captcha => "__umb_rcptch_clearance",
        }
    }

    /// Query parameter that marks a POST as a puzzle submission.
    pub fn submit_param(&self) -> &'static str {
        match self {
            ChallengeKind::Automated => "__umbuid",
            ChallengeKind::Captcha => "__umb_rcptch_cb",
        }
    }

    pub fn holding_status(&self) -> StatusCode {
        match self {
            ChallengeKind::Automated => StatusCode::SERVICE_UNAVAILABLE,
            ChallengeKind::Captcha => StatusCode::FORBIDDEN,
        }
    }

    fn cache_prefix(&self) -> &'static str {
        match self {
            ChallengeKind::Automated => "automated",
            ChallengeKind::Captcha => "recaptcha",
        }
    }

    /// Store key of the issued token for `source`.
    pub fn token_key(&self, source: &str) -> String {
        format!("{}UuidCache_{source}", self.cache_prefix())
    }

    /// Store key of the solved pair for `source`.
    pub fn passed_key(&self, source: &str) -> String {
        format!("{}Passed_{source}", self.cache_prefix())
    }
}

impl std::fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
