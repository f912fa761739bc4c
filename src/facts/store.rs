//! Fact ingestion and merge policy
//!
//! Candidates arrive from the extraction job; the store decides whether each
//! one becomes a new row, overwrites a similar existing row, or is discarded.
//! Merge is last-write-wins on confidence — no averaging, no evidence
//! accumulation.

use crate::facts::similarity::{SimilarityStrategy, SubstringSlice};
use crate::models::{Fact, FactCandidate};
use crate::quota::QuotaGate;
use crate::storage::FactRepository;
use crate::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Counts from one ingestion batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub inserted: usize,
    pub merged: usize,
    pub discarded: usize,
}

/// Per-category fact listing for the "what do you know about me" view
#[derive(Debug, Clone, serde::Serialize)]
pub struct FactsSummary {
    pub user_id: Uuid,
    pub total: usize,
    pub by_category: BTreeMap<String, Vec<String>>,
}

/// Durable per-user fact records with dedup/merge on ingestion
pub struct FactStore {
    repo: Arc<dyn FactRepository>,
    quota: Arc<QuotaGate>,
    similarity: Box<dyn SimilarityStrategy>,
}

impl FactStore {
    pub fn new(repo: Arc<dyn FactRepository>, quota: Arc<QuotaGate>) -> Self {
        Self::with_similarity(repo, quota, Box::new(SubstringSlice::new()))
    }

    pub fn with_similarity(
        repo: Arc<dyn FactRepository>,
        quota: Arc<QuotaGate>,
        similarity: Box<dyn SimilarityStrategy>,
    ) -> Self {
        Self {
            repo,
            quota,
            similarity,
        }
    }

    /// Ingest a batch of candidates for one user.
    ///
    /// Per candidate: validate, look for a similar stored fact, then either
    /// overwrite it (only when the candidate is more confident), insert a new
    /// row (only while the quota allows), or discard silently. A quota
    /// discard is a no-op by design, never an error.
    pub async fn ingest_candidates(
        &self,
        user_id: Uuid,
        candidates: Vec<FactCandidate>,
        source_message_id: Option<Uuid>,
    ) -> Result<IngestOutcome> {
        let mut outcome = IngestOutcome::default();
        if candidates.is_empty() {
            return Ok(outcome);
        }

        // Snapshot once; batch-local inserts and merges are tracked in the
        // snapshot so later candidates dedup against earlier ones.
        let mut existing = self.repo.list_facts(user_id).await?;

        for candidate in candidates {
            if let Err(e) = candidate.validate() {
                warn!(%user_id, error = %e, "Rejected extraction candidate");
                outcome.discarded += 1;
                continue;
            }

            let matched = existing
                .iter()
                .position(|f| self.similarity.is_match(&candidate.text, &f.text));

            match matched {
                Some(index) => {
                    if candidate.confidence > existing[index].confidence {
                        let fact = &mut existing[index];
                        fact.text = candidate.text;
                        fact.confidence = candidate.confidence;
                        fact.source_message_id = source_message_id;
                        fact.created_at = Utc::now();
                        self.repo.update_fact(fact).await?;
                        outcome.merged += 1;
                    } else {
                        debug!(
                            %user_id,
                            candidate = %candidate.text,
                            "Discarded candidate below stored confidence"
                        );
                        outcome.discarded += 1;
                    }
                }
                None => {
                    if self.quota.can_store_more(user_id).await? {
                        let fact = Fact {
                            id: Uuid::new_v4(),
                            user_id,
                            text: candidate.text,
                            confidence: candidate.confidence,
                            category: candidate.category,
                            created_at: Utc::now(),
                            last_used_at: None,
                            usage_count: 0,
                            source_message_id,
                        };
                        self.repo.insert_fact(fact.clone()).await?;
                        existing.push(fact);
                        outcome.inserted += 1;
                    } else {
                        info!(%user_id, "Fact quota reached, discarding new candidate");
                        outcome.discarded += 1;
                    }
                }
            }
        }

        debug!(
            %user_id,
            inserted = outcome.inserted,
            merged = outcome.merged,
            discarded = outcome.discarded,
            "Ingested extraction candidates"
        );

        Ok(outcome)
    }

    /// Everything stored about the user, grouped by category.
    pub async fn facts_summary(&self, user_id: Uuid) -> Result<FactsSummary> {
        let facts = self.repo.list_facts(user_id).await?;

        let mut by_category: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let total = facts.len();
        for fact in facts {
            by_category
                .entry(fact.category)
                .or_default()
                .push(fact.text);
        }

        Ok(FactsSummary {
            user_id,
            total,
            by_category,
        })
    }
}
