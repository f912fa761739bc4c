//! Companion agent facade
//!
//! Wires the session tracker, context assembler, fact store, and extraction
//! scheduler behind the operations the chat transport calls:
//!
//! MESSAGE → ASSEMBLE CONTEXT → GENERATE → RECORD → SCHEDULE EXTRACTION
//!
//! The transport never sees a dependency failure: generation errors fall
//! back to a neutral reply and memory degrades to empty sections.

use crate::context::{ContextAssembler, ContextBlock};
use crate::extraction::ExtractionScheduler;
use crate::facts::{FactStore, FactsSummary};
use crate::gemini::GenerationModel;
use crate::session::SessionTracker;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the agent facade
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Timeout around the main-path generation call
    pub reply_timeout: Duration,
    /// Reply used when the model is unreachable
    pub fallback_reply: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(30),
            fallback_reply:
                "I'm having a little trouble thinking right now — ask me again in a moment! 😅"
                    .to_string(),
        }
    }
}

pub struct CompanionAgent {
    sessions: Arc<SessionTracker>,
    assembler: ContextAssembler,
    store: Arc<FactStore>,
    scheduler: Arc<ExtractionScheduler>,
    model: Arc<dyn GenerationModel>,
    config: AgentConfig,
}

impl CompanionAgent {
    pub fn new(
        sessions: Arc<SessionTracker>,
        assembler: ContextAssembler,
        store: Arc<FactStore>,
        scheduler: Arc<ExtractionScheduler>,
        model: Arc<dyn GenerationModel>,
    ) -> Self {
        Self::with_config(
            sessions,
            assembler,
            store,
            scheduler,
            model,
            AgentConfig::default(),
        )
    }

    pub fn with_config(
        sessions: Arc<SessionTracker>,
        assembler: ContextAssembler,
        store: Arc<FactStore>,
        scheduler: Arc<ExtractionScheduler>,
        model: Arc<dyn GenerationModel>,
        config: AgentConfig,
    ) -> Self {
        Self {
            sessions,
            assembler,
            store,
            scheduler,
            model,
            config,
        }
    }

    /// Handle one inbound message end to end and return the reply.
    ///
    /// Generation failures degrade to the fallback reply; the exchange is
    /// recorded either way so the conversation keeps its numbering.
    pub async fn handle_message(&self, user_id: Uuid, text: &str) -> String {
        let context = self.assembler.assemble(user_id, text).await;
        let prompt = context.to_prompt();

        let reply = match tokio::time::timeout(
            self.config.reply_timeout,
            self.model.complete(&prompt),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(%user_id, error = %e, "Generation failed, using fallback reply");
                self.config.fallback_reply.clone()
            }
            Err(_) => {
                warn!(%user_id, "Generation timed out, using fallback reply");
                self.config.fallback_reply.clone()
            }
        };

        let message_number = self.record_exchange(user_id, text, &reply).await;
        info!(
            %user_id,
            message_number,
            context_hash = %context.context_hash,
            "Handled message"
        );

        reply
    }

    /// Record one exchange and, as a side effect, schedule fact extraction
    /// when the cadence says it is due. Returns the new message number.
    pub async fn record_exchange(&self, user_id: Uuid, user_text: &str, bot_text: &str) -> u64 {
        let (message_number, exchange_id) = self
            .sessions
            .record_exchange(user_id, user_text, bot_text)
            .await;

        self.scheduler
            .schedule_extraction(user_id, user_text, bot_text, exchange_id)
            .await;

        message_number
    }

    /// The context that would be fed to a generation call right now.
    /// Read-only apart from the fact selector's usage touch.
    pub async fn get_context(&self, user_id: Uuid, prompt: &str) -> ContextBlock {
        self.assembler.assemble(user_id, prompt).await
    }

    /// Drop the user's session and start a fresh one. Returns the new
    /// session id.
    pub async fn reset_session(&self, user_id: Uuid) -> Uuid {
        let session_id = self.sessions.start_session(user_id).await;
        info!(%user_id, %session_id, "Session reset");
        session_id
    }

    pub async fn suspend_learning(&self, user_id: Uuid, until: Option<DateTime<Utc>>) {
        self.scheduler.suspend_learning(user_id, until).await;
    }

    pub async fn resume_learning(&self, user_id: Uuid) {
        self.scheduler.resume_learning(user_id).await;
    }

    /// Everything stored about the user, grouped by category.
    pub async fn facts_summary(&self, user_id: Uuid) -> Result<FactsSummary> {
        self.store.facts_summary(user_id).await
    }
}
