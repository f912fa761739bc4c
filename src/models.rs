//! Core data models for the companion agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Entitlement =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementTier {
    Free,
    Premium,
}

impl EntitlementTier {
    pub fn from_subscribed(subscribed: bool) -> Self {
        if subscribed {
            EntitlementTier::Premium
        } else {
            EntitlementTier::Free
        }
    }
}

impl fmt::Display for EntitlementTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntitlementTier::Free => "Free",
            EntitlementTier::Premium => "Premium",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Facts =================
//

/// A confidence-scored statement learned about a user, persisted durably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: Uuid,
    pub user_id: Uuid,
    pub text: String,
    /// Confidence in [0.0, 1.0]
    pub confidence: f64,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u32,
    /// Exchange the fact was learned from, when known
    pub source_message_id: Option<Uuid>,
}

impl Fact {
    /// Render as a context line: `<text> (confidence: X.XX, category: Y)`
    pub fn context_line(&self) -> String {
        format!(
            "{} (confidence: {:.2}, category: {})",
            self.text, self.confidence, self.category
        )
    }
}

/// A fact proposed by the extraction model, before validation and merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactCandidate {
    #[serde(alias = "fact")]
    pub text: String,
    pub confidence: f64,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "general".to_string()
}

impl FactCandidate {
    /// Basic validation applied before a candidate reaches the merge
    /// algorithm. Confidence outside [0, 1] or empty text is rejected.
    pub fn validate(&self) -> crate::Result<()> {
        if self.text.trim().is_empty() {
            return Err(crate::error::CompanionError::InvalidCandidate(
                "empty fact text".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) || !self.confidence.is_finite() {
            return Err(crate::error::CompanionError::InvalidCandidate(format!(
                "confidence {} out of range",
                self.confidence
            )));
        }
        Ok(())
    }
}

//
// ================= Session =================
//

/// One user/bot turn inside a conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: Uuid,
    /// 1-based position within the session
    pub number: u64,
    pub user_text: String,
    pub bot_text: String,
    pub timestamp: DateTime<Utc>,
}

//
// ================= Customization =================
//

/// User-chosen personality/style/topic preferences. Read-only input to
/// context assembly; owned by the external settings collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomizationProfile {
    pub display_name: Option<String>,
    pub personality: String,
    pub response_style: String,
    pub language: String,
    pub interests: Vec<String>,
}

impl Default for CustomizationProfile {
    fn default() -> Self {
        Self {
            display_name: None,
            personality: "friendly".to_string(),
            response_style: "casual".to_string(),
            language: "en".to_string(),
            interests: Vec::new(),
        }
    }
}
