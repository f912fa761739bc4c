//! Fact extraction scheduling
//!
//! Decides when extraction runs and executes it off the response path.
//! Extraction jobs go through a bounded queue into a fixed-size worker pool,
//! so a traffic burst queues instead of spawning unbounded calls to the
//! model. Everything that goes wrong inside a job is logged and discarded;
//! the conversation path never sees it.

pub mod parser;

use crate::facts::FactStore;
use crate::gemini::GenerationModel;
use crate::quota::QuotaGate;
use crate::session::SessionTracker;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for extraction scheduling
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Extraction runs on every Nth message of a session
    pub cadence: u64,
    /// Fixed worker pool size
    pub workers: usize,
    /// Jobs queued beyond the pool before new ones are dropped
    pub queue_capacity: usize,
    /// Timeout around each model call, so a hung dependency degrades one
    /// background job instead of wedging a worker forever
    pub model_timeout: Duration,
    /// Candidates at or below this confidence are discarded by the job
    pub confidence_floor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cadence: 5,
            workers: 2,
            queue_capacity: 32,
            model_timeout: Duration::from_secs(30),
            confidence_floor: 0.6,
        }
    }
}

/// One queued extraction cycle
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub user_id: Uuid,
    pub user_text: String,
    pub bot_text: String,
    pub source_message_id: Uuid,
}

#[derive(Debug, Clone, Copy)]
struct LearningSuspension {
    until: Option<DateTime<Utc>>,
}

/// Decides when fact extraction runs and dispatches it to the worker pool
pub struct ExtractionScheduler {
    config: SchedulerConfig,
    sessions: Arc<SessionTracker>,
    quota: Arc<QuotaGate>,
    suspensions: RwLock<HashMap<Uuid, LearningSuspension>>,
    tx: mpsc::Sender<ExtractionJob>,
    // Detached workers; kept so the pool lives as long as the scheduler.
    _workers: Vec<JoinHandle<()>>,
}

impl ExtractionScheduler {
    pub fn new(
        sessions: Arc<SessionTracker>,
        quota: Arc<QuotaGate>,
        store: Arc<FactStore>,
        model: Arc<dyn GenerationModel>,
    ) -> Self {
        Self::with_config(sessions, quota, store, model, SchedulerConfig::default())
    }

    pub fn with_config(
        sessions: Arc<SessionTracker>,
        quota: Arc<QuotaGate>,
        store: Arc<FactStore>,
        model: Arc<dyn GenerationModel>,
        config: SchedulerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    rx.clone(),
                    store.clone(),
                    model.clone(),
                    config.model_timeout,
                    config.confidence_floor,
                ))
            })
            .collect();

        Self {
            config,
            sessions,
            quota,
            suspensions: RwLock::new(HashMap::new()),
            tx,
            _workers: workers,
        }
    }

    /// True exactly when the user's session is at an extraction point,
    /// learning is not suspended, and storing another fact is possible.
    pub async fn should_extract(&self, user_id: Uuid) -> bool {
        let message_count = self.sessions.message_count(user_id).await;
        self.should_extract_at(user_id, message_count, Utc::now())
            .await
    }

    async fn should_extract_at(
        &self,
        user_id: Uuid,
        message_count: u64,
        now: DateTime<Utc>,
    ) -> bool {
        if message_count == 0 || message_count % self.config.cadence != 0 {
            return false;
        }

        if self.is_suspended_at(user_id, now).await {
            return false;
        }

        match self.quota.can_store_more(user_id).await {
            Ok(can_store) => can_store,
            Err(e) => {
                warn!(%user_id, error = %e, "Quota check failed, skipping extraction");
                false
            }
        }
    }

    /// Enqueue an extraction cycle if one is due. Never blocks: a full queue
    /// drops the cycle with a warning. Returns whether a job was enqueued.
    pub async fn schedule_extraction(
        &self,
        user_id: Uuid,
        user_text: &str,
        bot_text: &str,
        source_message_id: Uuid,
    ) -> bool {
        if !self.should_extract(user_id).await {
            return false;
        }

        let job = ExtractionJob {
            user_id,
            user_text: user_text.to_string(),
            bot_text: bot_text.to_string(),
            source_message_id,
        };

        match self.tx.try_send(job) {
            Ok(()) => {
                debug!(%user_id, "Queued extraction job");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%user_id, "Extraction queue full, dropping cycle");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(%user_id, "Extraction workers gone, dropping cycle");
                false
            }
        }
    }

    /// Suspend learning for the user, indefinitely or until `until`.
    pub async fn suspend_learning(&self, user_id: Uuid, until: Option<DateTime<Utc>>) {
        let mut suspensions = self.suspensions.write().await;
        suspensions.insert(user_id, LearningSuspension { until });
        info!(%user_id, ?until, "Learning suspended");
    }

    /// Resume learning immediately.
    pub async fn resume_learning(&self, user_id: Uuid) {
        let mut suspensions = self.suspensions.write().await;
        if suspensions.remove(&user_id).is_some() {
            info!(%user_id, "Learning resumed");
        }
    }

    pub async fn is_learning_suspended(&self, user_id: Uuid) -> bool {
        self.is_suspended_at(user_id, Utc::now()).await
    }

    async fn is_suspended_at(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        {
            let suspensions = self.suspensions.read().await;
            match suspensions.get(&user_id) {
                None => return false,
                Some(s) => match s.until {
                    None => return true,
                    Some(until) if until > now => return true,
                    Some(_) => {}
                },
            }
        }

        // Expired: auto-resume without requiring an explicit call.
        let mut suspensions = self.suspensions.write().await;
        if let Some(s) = suspensions.get(&user_id) {
            if matches!(s.until, Some(until) if until <= now) {
                suspensions.remove(&user_id);
            }
        }
        false
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<ExtractionJob>>>,
    store: Arc<FactStore>,
    model: Arc<dyn GenerationModel>,
    model_timeout: Duration,
    confidence_floor: f64,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };

        let Some(job) = job else {
            debug!(worker, "Extraction queue closed, worker exiting");
            break;
        };

        run_extraction(&job, &store, model.as_ref(), model_timeout, confidence_floor).await;
    }
}

/// One extraction cycle. Every failure class is terminal for the cycle:
/// logged, discarded, no retry.
async fn run_extraction(
    job: &ExtractionJob,
    store: &FactStore,
    model: &dyn GenerationModel,
    model_timeout: Duration,
    confidence_floor: f64,
) {
    let prompt = extraction_prompt(&job.user_text, &job.bot_text);

    let raw = match tokio::time::timeout(model_timeout, model.complete(&prompt)).await {
        Err(_) => {
            warn!(user_id = %job.user_id, "Extraction model call timed out");
            return;
        }
        Ok(Err(e)) => {
            warn!(user_id = %job.user_id, error = %e, "Extraction model call failed");
            return;
        }
        Ok(Ok(raw)) => raw,
    };

    let candidates = match parser::parse_candidates(&raw) {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!(user_id = %job.user_id, error = %e, "Discarding unparseable extraction cycle");
            return;
        }
    };

    let accepted: Vec<_> = candidates
        .into_iter()
        .filter(|c| c.confidence > confidence_floor)
        .collect();

    if accepted.is_empty() {
        debug!(user_id = %job.user_id, "No candidates above confidence floor");
        return;
    }

    match store
        .ingest_candidates(job.user_id, accepted, Some(job.source_message_id))
        .await
    {
        Ok(outcome) => {
            info!(
                user_id = %job.user_id,
                inserted = outcome.inserted,
                merged = outcome.merged,
                discarded = outcome.discarded,
                "Extraction cycle complete"
            );
        }
        Err(e) => {
            warn!(user_id = %job.user_id, error = %e, "Failed to store extracted facts");
        }
    }
}

/// Prompt asking the model to mine one exchange for user facts.
fn extraction_prompt(user_text: &str, bot_text: &str) -> String {
    format!(
        r#"Extract factual information about the user from this conversation snippet.
Focus on personal details, preferences, interests, opinions, or other factual information.

For each fact:
1. State the fact clearly and concisely
2. Rate your confidence in this fact from 0.0 to 1.0
3. Categorize it (personal, preference, interest, opinion, demographic, etc.)

Format the response as a JSON array with objects containing:
{{"fact": "The fact statement", "confidence": 0.95, "category": "category"}}

Only extract facts if confidence > 0.6. Return an empty array if no facts found.

Conversation:
User: {}
Bot: {}

Return ONLY valid JSON, nothing else:"#,
        user_text, bot_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::InMemoryEntitlementProvider;
    use crate::gemini::MockModel;
    use crate::quota::QuotaConfig;
    use crate::storage::{FactRepository, InMemoryFactRepository};
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        sessions: Arc<SessionTracker>,
        repo: Arc<InMemoryFactRepository>,
        entitlement: Arc<InMemoryEntitlementProvider>,
        scheduler: ExtractionScheduler,
    }

    fn fixture(model: Arc<dyn GenerationModel>, free_fact_limit: u64) -> Fixture {
        let sessions = Arc::new(SessionTracker::new());
        let repo = Arc::new(InMemoryFactRepository::new());
        let entitlement = Arc::new(InMemoryEntitlementProvider::new());
        let quota = Arc::new(QuotaGate::with_config(
            entitlement.clone(),
            repo.clone(),
            QuotaConfig { free_fact_limit },
        ));
        let store = Arc::new(FactStore::new(repo.clone(), quota.clone()));
        let scheduler = ExtractionScheduler::new(sessions.clone(), quota, store, model);
        Fixture {
            sessions,
            repo,
            entitlement,
            scheduler,
        }
    }

    async fn wait_for_facts(repo: &InMemoryFactRepository, user_id: Uuid, expected: u64) -> bool {
        for _ in 0..100 {
            if repo.count_facts(user_id).await.unwrap() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_cadence_gates_extraction() {
        let fx = fixture(Arc::new(MockModel::new()), 50);
        let user_id = Uuid::new_v4();

        for _ in 0..4 {
            fx.sessions.record_exchange(user_id, "hi", "hello").await;
        }
        assert!(!fx.scheduler.should_extract(user_id).await);

        fx.sessions.record_exchange(user_id, "hi", "hello").await;
        assert!(fx.scheduler.should_extract(user_id).await);
    }

    #[tokio::test]
    async fn test_fresh_session_never_extracts() {
        let fx = fixture(Arc::new(MockModel::new()), 50);
        assert!(!fx.scheduler.should_extract(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn test_suspension_blocks_extraction() {
        let fx = fixture(Arc::new(MockModel::new()), 50);
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            fx.sessions.record_exchange(user_id, "hi", "hello").await;
        }

        fx.scheduler.suspend_learning(user_id, None).await;
        assert!(!fx.scheduler.should_extract(user_id).await);

        fx.scheduler.resume_learning(user_id).await;
        assert!(fx.scheduler.should_extract(user_id).await);
    }

    #[tokio::test]
    async fn test_timed_suspension_auto_resumes() {
        let fx = fixture(Arc::new(MockModel::new()), 50);
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            fx.sessions.record_exchange(user_id, "hi", "hello").await;
        }

        let now = Utc::now();
        fx.scheduler
            .suspend_learning(user_id, Some(now + ChronoDuration::hours(1)))
            .await;

        assert!(!fx.scheduler.should_extract_at(user_id, 5, now).await);

        // Past the expiry the suspension lapses with no explicit resume.
        let later = now + ChronoDuration::hours(2);
        assert!(fx.scheduler.should_extract_at(user_id, 5, later).await);
        assert!(!fx.scheduler.is_suspended_at(user_id, later).await);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_blocks_extraction_for_free_users() {
        let fx = fixture(Arc::new(MockModel::new()), 0);
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            fx.sessions.record_exchange(user_id, "hi", "hello").await;
        }

        assert!(!fx.scheduler.should_extract(user_id).await);

        fx.entitlement.set_subscribed(user_id, true).await;
        assert!(fx.scheduler.should_extract(user_id).await);
    }

    #[tokio::test]
    async fn test_due_cycle_extracts_and_stores() {
        let model = MockModel::with_replies(
            "hello",
            r#"[{"fact": "Enjoys playing chess on weekends", "confidence": 0.8, "category": "interest"}]"#,
        );
        let fx = fixture(Arc::new(model), 50);
        let user_id = Uuid::new_v4();

        let mut exchange_id = Uuid::new_v4();
        for _ in 0..5 {
            let (_, id) = fx.sessions.record_exchange(user_id, "I love chess", "Nice!").await;
            exchange_id = id;
        }

        let enqueued = fx
            .scheduler
            .schedule_extraction(user_id, "I love chess", "Nice!", exchange_id)
            .await;
        assert!(enqueued);

        assert!(wait_for_facts(&fx.repo, user_id, 1).await);
        let facts = fx.repo.list_facts(user_id).await.unwrap();
        assert_eq!(facts[0].confidence, 0.8);
        assert_eq!(facts[0].source_message_id, Some(exchange_id));
    }

    #[tokio::test]
    async fn test_candidates_at_or_below_floor_are_dropped() {
        let model = MockModel::with_replies(
            "hello",
            r#"[{"fact": "Maybe likes tea", "confidence": 0.5, "category": "preference"},
                {"fact": "Exactly at the floor", "confidence": 0.6, "category": "preference"}]"#,
        );
        let fx = fixture(Arc::new(model), 50);
        let user_id = Uuid::new_v4();

        for _ in 0..5 {
            fx.sessions.record_exchange(user_id, "hi", "hello").await;
        }
        assert!(
            fx.scheduler
                .schedule_extraction(user_id, "hi", "hello", Uuid::new_v4())
                .await
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.repo.count_facts(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_is_isolated() {
        struct FailingModel;

        #[async_trait::async_trait]
        impl GenerationModel for FailingModel {
            async fn complete(&self, _prompt: &str) -> crate::Result<String> {
                Err(crate::error::CompanionError::LlmError("boom".to_string()))
            }
        }

        let fx = fixture(Arc::new(FailingModel), 50);
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            fx.sessions.record_exchange(user_id, "hi", "hello").await;
        }

        assert!(
            fx.scheduler
                .schedule_extraction(user_id, "hi", "hello", Uuid::new_v4())
                .await
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.repo.count_facts(user_id).await.unwrap(), 0);

        // The pool is still alive and processes later cycles.
        assert!(fx.scheduler.should_extract(user_id).await);
    }

    #[tokio::test]
    async fn test_malformed_output_discards_cycle() {
        let model = MockModel::with_replies("hello", "I couldn't find any facts, sorry!");
        let fx = fixture(Arc::new(model), 50);
        let user_id = Uuid::new_v4();

        for _ in 0..5 {
            fx.sessions.record_exchange(user_id, "hi", "hello").await;
        }
        assert!(
            fx.scheduler
                .schedule_extraction(user_id, "hi", "hello", Uuid::new_v4())
                .await
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.repo.count_facts(user_id).await.unwrap(), 0);
    }
}
