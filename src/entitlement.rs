//! Entitlement collaborator
//!
//! Subscription status is owned by the external identity/billing layer. The
//! engine only asks one question: is this user subscribed right now.

use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for the external entitlement collaborator
#[async_trait::async_trait]
pub trait EntitlementProvider: Send + Sync {
    async fn is_subscribed(&self, user_id: Uuid) -> Result<bool>;
}

/// In-memory entitlement provider for development
pub struct InMemoryEntitlementProvider {
    subscribed: Arc<RwLock<HashSet<Uuid>>>,
}

impl InMemoryEntitlementProvider {
    pub fn new() -> Self {
        Self {
            subscribed: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub async fn set_subscribed(&self, user_id: Uuid, subscribed: bool) {
        let mut set = self.subscribed.write().await;
        if subscribed {
            set.insert(user_id);
        } else {
            set.remove(&user_id);
        }
    }
}

impl Default for InMemoryEntitlementProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EntitlementProvider for InMemoryEntitlementProvider {
    async fn is_subscribed(&self, user_id: Uuid) -> Result<bool> {
        let set = self.subscribed.read().await;
        Ok(set.contains(&user_id))
    }
}
