//! Ranked fact selection
//!
//! Selection is retrieval-with-feedback, not a pure read: every returned
//! fact is stamped `last_used_at = now` and its usage count incremented in
//! the same operation. Facts of equal confidence therefore rotate through
//! context instead of one being quoted every turn, while strictly higher
//! confidence always wins regardless of rotation.

use crate::models::Fact;
use crate::storage::FactRepository;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct FactSelector {
    repo: Arc<dyn FactRepository>,
}

impl FactSelector {
    pub fn new(repo: Arc<dyn FactRepository>) -> Self {
        Self { repo }
    }

    /// Top-k facts for the user, ordered by confidence DESC, then
    /// least-recently-used (never-used first), then usage count ASC.
    /// Optionally restricted to the given categories.
    pub async fn select(
        &self,
        user_id: Uuid,
        k: usize,
        categories: Option<&[String]>,
    ) -> Result<Vec<Fact>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let selected = self
            .repo
            .select_and_touch(user_id, k, categories, Utc::now())
            .await?;

        debug!(%user_id, selected = selected.len(), "Selected facts for context");
        Ok(selected)
    }
}
