use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Issued challenge: puzzle handed out immediately, clearance released on solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeToken {
    pub puzzle: String,
    pub clearance: String,
    /// Unix seconds.
    pub expires_at: u64,
}

impl ChallengeToken {
    pub fn generate(ttl_secs: u64) -> Self {
        Self {
            puzzle: Uuid::new_v4().to_string(),
            clearance: Uuid::new_v4().to_string(),
            expires_at: unix_now().saturating_add(ttl_secs),
        }
    }

    /// `puzzle_clearance_expiresAt`
    pub fn encode(&self) -> String {
        format!("{}_{}_{}", self.puzzle, self.clearance, self.expires_at)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '_');
        let puzzle = parts.next().filter(|p| !p.is_empty())?;
        let clearance = parts.next().filter(|c| !c.is_empty())?;
        let expires_at = parts.next()?.parse().ok()?;
        Some(Self { puzzle: puzzle.to_string(), clearance: clearance.to_string(), expires_at })
    }

    /// `puzzle_clearance`, the value recorded once the puzzle is solved.
    pub fn pair(&self) -> String {
        format!("{}_{}", self.puzzle, self.clearance)
    }

    /// Seconds left before expiry, zero once expired.
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at.saturating_sub(unix_now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_secs() == 0
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
