//! Free-tier fact quota
//!
//! Subscribed users store facts without limit; free users are capped. The
//! gate is a pure read and is consulted before insertions only — merges that
//! overwrite an existing row never go through it.

use crate::entitlement::EntitlementProvider;
use crate::storage::FactRepository;
use crate::Result;
use std::sync::Arc;
use uuid::Uuid;

/// Configuration for the quota gate
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Facts a non-subscribed user may store
    pub free_fact_limit: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_fact_limit: 50,
        }
    }
}

/// Entitlement-aware cap on stored facts
pub struct QuotaGate {
    entitlement: Arc<dyn EntitlementProvider>,
    repo: Arc<dyn FactRepository>,
    config: QuotaConfig,
}

impl QuotaGate {
    pub fn new(entitlement: Arc<dyn EntitlementProvider>, repo: Arc<dyn FactRepository>) -> Self {
        Self::with_config(entitlement, repo, QuotaConfig::default())
    }

    pub fn with_config(
        entitlement: Arc<dyn EntitlementProvider>,
        repo: Arc<dyn FactRepository>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            entitlement,
            repo,
            config,
        }
    }

    /// True while the user may store another fact.
    pub async fn can_store_more(&self, user_id: Uuid) -> Result<bool> {
        if self.entitlement.is_subscribed(user_id).await? {
            return Ok(true);
        }

        let count = self.repo.count_facts(user_id).await?;
        Ok(count < self.config.free_fact_limit)
    }

    pub fn free_fact_limit(&self) -> u64 {
        self.config.free_fact_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::InMemoryEntitlementProvider;
    use crate::models::Fact;
    use crate::storage::InMemoryFactRepository;
    use chrono::Utc;

    fn fact(user_id: Uuid, text: &str) -> Fact {
        Fact {
            id: Uuid::new_v4(),
            user_id,
            text: text.to_string(),
            confidence: 0.8,
            category: "general".to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            usage_count: 0,
            source_message_id: None,
        }
    }

    #[tokio::test]
    async fn test_free_user_is_capped() {
        let entitlement = Arc::new(InMemoryEntitlementProvider::new());
        let repo = Arc::new(InMemoryFactRepository::new());
        let gate = QuotaGate::with_config(
            entitlement.clone(),
            repo.clone(),
            QuotaConfig { free_fact_limit: 2 },
        );
        let user_id = Uuid::new_v4();

        assert!(gate.can_store_more(user_id).await.unwrap());

        repo.insert_fact(fact(user_id, "one")).await.unwrap();
        assert!(gate.can_store_more(user_id).await.unwrap());

        repo.insert_fact(fact(user_id, "two")).await.unwrap();
        assert!(!gate.can_store_more(user_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_subscribed_user_bypasses_cap() {
        let entitlement = Arc::new(InMemoryEntitlementProvider::new());
        let repo = Arc::new(InMemoryFactRepository::new());
        let gate = QuotaGate::with_config(
            entitlement.clone(),
            repo.clone(),
            QuotaConfig { free_fact_limit: 1 },
        );
        let user_id = Uuid::new_v4();
        entitlement.set_subscribed(user_id, true).await;

        repo.insert_fact(fact(user_id, "one")).await.unwrap();
        repo.insert_fact(fact(user_id, "two")).await.unwrap();

        assert!(gate.can_store_more(user_id).await.unwrap());
    }
}
