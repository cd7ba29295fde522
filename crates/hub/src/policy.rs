//! Allow/deny gate checked before every outbound request.

use crate::error::{ErrorKind, Result};
use modelhub_config::{HubSettings, RuleFilter, UrlRule};

#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    rules: Vec<UrlRule>,
    bypass: bool,
}
impl UrlPolicy {
    pub fn new(rules: Vec<UrlRule>, bypass: bool) -> Self {
        Self { rules, bypass }
    }

    pub fn from_settings(settings: &HubSettings) -> Self {
        Self::new(settings.rules.clone(), settings.bypass_rules)
    }

    /// The first rule whose prefix matches decides; no match allows.
    pub fn is_allowed(&self, url: &str) -> bool {
        if self.bypass {
            return true;
        }
        self.rules
            .iter()
            .find(|rule| url.starts_with(&rule.url_prefix))
            .is_none_or(|rule| rule.filter == RuleFilter::Allow)
    }

    pub fn check(&self, url: &str) -> Result<()> {
        if !self.is_allowed(url) {
            tracing::warn!(url, "Blocked by URL policy");
            exn::bail!(ErrorKind::Forbidden(url.to_string()));
        }
        Ok(())
    }
}
