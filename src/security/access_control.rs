//! Caller access lists.
//!
//! Allowlisted callers (operators, internal services) skip rate limiting
//! entirely; denylisted callers are rejected before any store traffic.

use std::collections::HashSet;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
    Limit,
}

#[derive(Debug, Clone, Default)]
pub struct CallerAccessList {
    allow: HashSet<String>,
    deny: HashSet<String>,
}

impl CallerAccessList {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            allow: config.allowlist.iter().cloned().collect(),
            deny: config.denylist.iter().cloned().collect(),
        }
    }

    /// Deny wins when a caller appears on both lists.
    pub fn check(&self, caller: &str) -> Access {
        if self.deny.contains(caller) {
            Access::Deny
        } else if self.allow.contains(caller) {
            Access::Allow
        } else {
            Access::Limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check() {
        let config = RateLimitConfig {
            allowlist: vec!["ops".into(), "both".into()],
            denylist: vec!["spammer".into(), "both".into()],
            ..RateLimitConfig::default()
        };
        let access = CallerAccessList::from_config(&config);

        assert_eq!(access.check("ops"), Access::Allow);
        assert_eq!(access.check("spammer"), Access::Deny);
        assert_eq!(access.check("both"), Access::Deny);
        assert_eq!(access.check("u1"), Access::Limit);
    }
}
