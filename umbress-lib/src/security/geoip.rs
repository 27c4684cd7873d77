use ahash::AHashSet;
use http::HeaderMap;

use crate::config::{GeoAction, GeoIpRule, GeoListType};

/// Effect of the geoip rule on the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoDecision {
    /// Rule does not apply or resolved to `continue`.
    Continue,
    /// Skip the challenge stages.
    Bypass,
    /// Require the automated challenge.
    RequireAutomated,
    /// Require the captcha challenge.
    RequireCaptcha,
    Block,
}

impl From<GeoAction> for GeoDecision {
    fn from(action: GeoAction) -> Self {
        match action {
            GeoAction::Pass => GeoDecision::Bypass,
            GeoAction::Check => GeoDecision::RequireAutomated,
            GeoAction::Recaptcha => GeoDecision::RequireCaptcha,
            GeoAction::Block => GeoDecision::Block,
            GeoAction::Continue => GeoDecision::Continue,
        }
    }
}

/// Country rule resolved once from configuration.
#[derive(Debug, Clone)]
pub struct GeoPolicy {
    header: String,
    codes: AHashSet<String>,
    listed: GeoAction,
    unlisted: GeoAction,
}

impl GeoPolicy {
    pub fn new(rule: &GeoIpRule) -> Self {
        let (default_listed, default_unlisted) = match rule.list_type {
            GeoListType::Whitelist => (GeoAction::Pass, GeoAction::Block),
            GeoListType::Blacklist => (GeoAction::Block, GeoAction::Continue),
        };
        Self {
            header: rule.header.to_ascii_lowercase(),
            codes: rule.codes.iter().map(|c| c.trim().to_ascii_uppercase()).collect(),
            listed: rule.action.unwrap_or(default_listed),
            unlisted: rule.otherwise.unwrap_or(default_unlisted),
        }
    }

    /// Decision for the country header of a request. Requests without the header are
    /// unaffected.
    pub fn evaluate(&self, headers: &HeaderMap) -> GeoDecision {
        let Some(country) = headers.get(self.header.as_str()).and_then(|v| v.to_str().ok())
        else {
            return GeoDecision::Continue;
        };
        let country = country.trim().to_ascii_uppercase();
        if self.codes.contains(&country) {
            self.listed.into()
        } else {
            self.unlisted.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn rule(list_type: GeoListType, action: Option<GeoAction>, otherwise: Option<GeoAction>) -> GeoIpRule {
        GeoIpRule {
            list_type,
            codes: vec!["DE".into(), "fr".into()],
            action,
            otherwise,
            header: "X-Umbress-Country".into(),
        }
    }

    fn headers(country: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(country) {
            h.insert("x-umbress-country", v);
        }
        h
    }

    #[test]
    fn whitelist_defaults() {
        let p = GeoPolicy::new(&rule(GeoListType::Whitelist, None, None));
        assert_eq!(p.evaluate(&headers("DE")), GeoDecision::Bypass);
        assert_eq!(p.evaluate(&headers("fr")), GeoDecision::Bypass);
        assert_eq!(p.evaluate(&headers("CN")), GeoDecision::Block);
        assert_eq!(p.evaluate(&HeaderMap::new()), GeoDecision::Continue);
    }

    #[test]
    fn blacklist_defaults() {
        let p = GeoPolicy::new(&rule(GeoListType::Blacklist, None, None));
        assert_eq!(p.evaluate(&headers("DE")), GeoDecision::Block);
        assert_eq!(p.evaluate(&headers("US")), GeoDecision::Continue);
    }

    #[test]
    fn explicit_actions_override_defaults() {
        let p = GeoPolicy::new(&rule(
            GeoListType::Blacklist,
            Some(GeoAction::Recaptcha),
            Some(GeoAction::Check),
        ));
        assert_eq!(p.evaluate(&headers("DE")), GeoDecision::RequireCaptcha);
        assert_eq!(p.evaluate(&headers("US")), GeoDecision::RequireAutomated);
    }
}
