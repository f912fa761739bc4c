//! Customization profile collaborator
//!
//! Profiles are owned and mutated by an external settings layer; the engine
//! only reads them during context assembly. The in-memory provider exists for
//! development and tests.

use crate::models::CustomizationProfile;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for the external settings collaborator
#[async_trait::async_trait]
pub trait ProfileProvider: Send + Sync {
    /// Returns the user's profile, with defaults applied for unset users.
    async fn profile(&self, user_id: Uuid) -> Result<CustomizationProfile>;
}

/// In-memory profile provider for development
pub struct InMemoryProfileProvider {
    profiles: Arc<RwLock<HashMap<Uuid, CustomizationProfile>>>,
}

impl InMemoryProfileProvider {
    pub fn new() -> Self {
        Self {
            profiles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn set_profile(&self, user_id: Uuid, profile: CustomizationProfile) {
        let mut profiles = self.profiles.write().await;
        profiles.insert(user_id, profile);
    }
}

impl Default for InMemoryProfileProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProfileProvider for InMemoryProfileProvider {
    async fn profile(&self, user_id: Uuid) -> Result<CustomizationProfile> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(&user_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_for_unknown_user() {
        let provider = InMemoryProfileProvider::new();
        let profile = provider.profile(Uuid::new_v4()).await.unwrap();
        assert_eq!(profile.personality, "friendly");
        assert_eq!(profile.response_style, "casual");
        assert_eq!(profile.language, "en");
        assert!(profile.interests.is_empty());
    }

    #[tokio::test]
    async fn test_set_and_read_profile() {
        let provider = InMemoryProfileProvider::new();
        let user_id = Uuid::new_v4();

        let profile = CustomizationProfile {
            display_name: Some("Wail".to_string()),
            personality: "playful".to_string(),
            response_style: "short".to_string(),
            language: "fr".to_string(),
            interests: vec!["coding".to_string()],
        };
        provider.set_profile(user_id, profile.clone()).await;

        let loaded = provider.profile(user_id).await.unwrap();
        assert_eq!(loaded, profile);
    }
}
