//! Security levels and reply policies

use serde::{Deserialize, Serialize};

/// How strongly a cryptographic measure is required
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Fail the send if the measure cannot be applied
    Must,
    /// Apply the measure when keys are available
    #[default]
    IfPossible,
    /// Never apply the measure
    No,
}

/// How replies to inbound messages are secured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPolicy {
    /// Mirror the request exactly, or fail
    Same,
    /// Mirror the request, dropping what cannot be reproduced
    TrySame,
    /// Ignore the request and apply the configured levels
    #[default]
    AsDefined,
}

/// Engine-wide security settings, fixed at `init_security`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Whether outgoing messages are sealed for the recipient
    pub encryption_level: SecurityLevel,
    /// Whether outgoing messages are signed by the owner
    pub signature_level: SecurityLevel,
    /// How replies are secured
    pub reply_policy: ReplyPolicy,
    /// Refuse signed inbound messages whose sender key is unknown
    pub refuse_unverifiably: bool,
}

impl SecurityPolicy {
    /// Policy with the given levels, `AsDefined` replies and lenient verification
    pub fn new(encryption_level: SecurityLevel, signature_level: SecurityLevel) -> Self {
        Self {
            encryption_level,
            signature_level,
            ..Self::default()
        }
    }

    /// Set the reply policy
    pub fn with_reply_policy(mut self, reply_policy: ReplyPolicy) -> Self {
        self.reply_policy = reply_policy;
        self
    }

    /// Refuse unverifiable inbound messages
    pub fn refusing_unverifiable(mut self, refuse: bool) -> Self {
        self.refuse_unverifiably = refuse;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = SecurityPolicy::default();
        assert_eq!(policy.encryption_level, SecurityLevel::IfPossible);
        assert_eq!(policy.signature_level, SecurityLevel::IfPossible);
        assert_eq!(policy.reply_policy, ReplyPolicy::AsDefined);
        assert!(!policy.refuse_unverifiably);
    }

    #[test]
    fn test_policy_from_json() {
        let policy: SecurityPolicy =
            serde_json::from_str(r#"{"encryption_level":"must","reply_policy":"try_same"}"#).unwrap();
        assert_eq!(policy.encryption_level, SecurityLevel::Must);
        assert_eq!(policy.signature_level, SecurityLevel::IfPossible);
        assert_eq!(policy.reply_policy, ReplyPolicy::TrySame);
    }
}
