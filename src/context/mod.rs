//! Context assembly
//!
//! Composes recent history, selected facts, and the user's customization
//! profile into the memory context handed to each generation call. The
//! output is a structured record so callers can log exactly what was used
//! and tests can assert on structure instead of string content.

use crate::entitlement::EntitlementProvider;
use crate::facts::FactSelector;
use crate::models::{CustomizationProfile, EntitlementTier, Exchange, Fact};
use crate::profile::ProfileProvider;
use crate::session::SessionTracker;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub const NO_HISTORY_SENTINEL: &str = "No recent conversation history.";
pub const NO_FACTS_SENTINEL: &str = "No specific facts known about this user yet.";

/// Configuration for context assembly
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// History exchanges included per request
    pub history_limit: usize,
    /// Facts included per request
    pub fact_limit: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            history_limit: 5,
            fact_limit: 5,
        }
    }
}

/// The assembled memory context for one generation call
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContextBlock {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    /// Number the next recorded exchange will get
    pub next_message_number: u64,
    pub prompt: String,
    pub history: Vec<Exchange>,
    pub facts: Vec<Fact>,
    pub profile: CustomizationProfile,
    pub tier: EntitlementTier,
    pub assembled_at: DateTime<Utc>,
    /// SHA-256 over the deterministic sections (history, facts, profile,
    /// tier) — identical inputs always produce the same hash
    pub context_hash: String,
}

impl ContextBlock {
    /// History rendered as `[Message #n] / User: … / Bot: …` blocks,
    /// oldest-first, or the explicit no-history sentinel.
    pub fn render_history(&self) -> String {
        if self.history.is_empty() {
            return NO_HISTORY_SENTINEL.to_string();
        }

        let mut out = String::new();
        for exchange in &self.history {
            out.push_str(&format!("[Message #{}]\n", exchange.number));
            out.push_str(&format!("User: {}\n", exchange.user_text));
            out.push_str(&format!("Bot: {}\n\n", exchange.bot_text));
        }
        out.trim_end().to_string()
    }

    /// Facts rendered one per line, or the explicit no-facts sentinel.
    pub fn render_facts(&self) -> String {
        if self.facts.is_empty() {
            return NO_FACTS_SENTINEL.to_string();
        }

        self.facts
            .iter()
            .map(Fact::context_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The full prompt for the generation call.
    pub fn to_prompt(&self) -> String {
        let name = self
            .profile
            .display_name
            .as_deref()
            .unwrap_or("not stated");

        let interests = if self.profile.interests.is_empty() {
            "none stated".to_string()
        } else {
            self.profile.interests.join(", ")
        };

        let memory_note = match self.tier {
            EntitlementTier::Premium => {
                "Memory: unlimited. Use everything you know about this user."
            }
            EntitlementTier::Free => {
                "Memory: limited free tier. Stick to the most relevant facts."
            }
        };

        format!(
            r#"You are a friendly AI companion.

CONVERSATION CONTEXT:
- Current message number: #{} in this conversation
- User's name: {}
- Preferred language: {}
- Personality: {}
- Response style: {}
- Interests: {}
- Subscription status: {}

{}

WHAT YOU KNOW ABOUT THE USER:
{}

RECENT CONVERSATION HISTORY:
{}

User message: {}"#,
            self.next_message_number,
            name,
            self.profile.language,
            self.profile.personality,
            self.profile.response_style,
            interests,
            self.tier,
            memory_note,
            self.render_facts(),
            self.render_history(),
            self.prompt,
        )
    }
}

/// Composes the memory context for each generation request
pub struct ContextAssembler {
    sessions: Arc<SessionTracker>,
    selector: Arc<FactSelector>,
    profiles: Arc<dyn ProfileProvider>,
    entitlement: Arc<dyn EntitlementProvider>,
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(
        sessions: Arc<SessionTracker>,
        selector: Arc<FactSelector>,
        profiles: Arc<dyn ProfileProvider>,
        entitlement: Arc<dyn EntitlementProvider>,
    ) -> Self {
        Self::with_config(
            sessions,
            selector,
            profiles,
            entitlement,
            AssemblerConfig::default(),
        )
    }

    pub fn with_config(
        sessions: Arc<SessionTracker>,
        selector: Arc<FactSelector>,
        profiles: Arc<dyn ProfileProvider>,
        entitlement: Arc<dyn EntitlementProvider>,
        config: AssemblerConfig,
    ) -> Self {
        Self {
            sessions,
            selector,
            profiles,
            entitlement,
            config,
        }
    }

    /// Assemble the context for one request. Dependency failures degrade to
    /// safe defaults (no facts, default profile, free tier) instead of
    /// erroring — the conversation must survive a flaky store.
    pub async fn assemble(&self, user_id: Uuid, prompt: &str) -> ContextBlock {
        let history = self
            .sessions
            .get_history(user_id, self.config.history_limit)
            .await;
        let session_id = self.sessions.session_id(user_id).await;
        let next_message_number = self.sessions.message_count(user_id).await + 1;

        let facts = match self
            .selector
            .select(user_id, self.config.fact_limit, None)
            .await
        {
            Ok(facts) => facts,
            Err(e) => {
                warn!(%user_id, error = %e, "Fact selection failed, assembling without facts");
                Vec::new()
            }
        };

        let profile = match self.profiles.profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(%user_id, error = %e, "Profile lookup failed, using defaults");
                CustomizationProfile::default()
            }
        };

        let tier = match self.entitlement.is_subscribed(user_id).await {
            Ok(subscribed) => EntitlementTier::from_subscribed(subscribed),
            Err(e) => {
                warn!(%user_id, error = %e, "Entitlement lookup failed, assuming free tier");
                EntitlementTier::Free
            }
        };

        let mut block = ContextBlock {
            user_id,
            session_id,
            next_message_number,
            prompt: prompt.to_string(),
            history,
            facts,
            profile,
            tier,
            assembled_at: Utc::now(),
            context_hash: String::new(),
        };
        block.context_hash = compute_context_hash(&block);
        block
    }
}

/// SHA-256 hash of the deterministic context sections.
/// Uses zero-copy streaming serialization into the hasher.
pub fn compute_context_hash(block: &ContextBlock) -> String {
    let mut hasher = Sha256::new();
    let mut writer = HashWriter(&mut hasher);

    let _ = writer.write_all(block.render_history().as_bytes());
    let _ = writer.write_all(b"\x1f");
    let _ = writer.write_all(block.render_facts().as_bytes());
    let _ = writer.write_all(b"\x1f");
    if serde_json::to_writer(&mut writer, &block.profile).is_err() {
        return String::new();
    }
    let _ = writer.write_all(b"\x1f");
    let _ = writer.write_all(block.tier.to_string().as_bytes());

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::InMemoryEntitlementProvider;
    use crate::profile::InMemoryProfileProvider;
    use crate::storage::{FactRepository, InMemoryFactRepository};

    struct Fixture {
        sessions: Arc<SessionTracker>,
        repo: Arc<InMemoryFactRepository>,
        entitlement: Arc<InMemoryEntitlementProvider>,
        profiles: Arc<InMemoryProfileProvider>,
        assembler: ContextAssembler,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(SessionTracker::new());
        let repo = Arc::new(InMemoryFactRepository::new());
        let entitlement = Arc::new(InMemoryEntitlementProvider::new());
        let profiles = Arc::new(InMemoryProfileProvider::new());
        let selector = Arc::new(FactSelector::new(repo.clone()));
        let assembler = ContextAssembler::new(
            sessions.clone(),
            selector,
            profiles.clone(),
            entitlement.clone(),
        );
        Fixture {
            sessions,
            repo,
            entitlement,
            profiles,
            assembler,
        }
    }

    fn fact(user_id: Uuid, text: &str, confidence: f64) -> Fact {
        Fact {
            id: Uuid::new_v4(),
            user_id,
            text: text.to_string(),
            confidence,
            category: "general".to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            usage_count: 0,
            source_message_id: None,
        }
    }

    #[tokio::test]
    async fn test_empty_context_uses_sentinels() {
        let fx = fixture();
        let block = fx.assembler.assemble(Uuid::new_v4(), "hello").await;

        assert_eq!(block.render_history(), NO_HISTORY_SENTINEL);
        assert_eq!(block.render_facts(), NO_FACTS_SENTINEL);
        assert_eq!(block.next_message_number, 1);
        assert!(block.session_id.is_none());
    }

    #[tokio::test]
    async fn test_history_rendering_includes_message_numbers() {
        let fx = fixture();
        let user_id = Uuid::new_v4();

        fx.sessions.record_exchange(user_id, "hi", "hello!").await;
        fx.sessions
            .record_exchange(user_id, "how are you?", "great")
            .await;

        let block = fx.assembler.assemble(user_id, "next").await;
        let rendered = block.render_history();

        assert!(rendered.starts_with("[Message #1]"));
        assert!(rendered.contains("User: how are you?"));
        assert!(rendered.contains("Bot: great"));
        assert_eq!(block.next_message_number, 3);
    }

    #[tokio::test]
    async fn test_facts_are_rendered_with_confidence_and_category() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        fx.repo
            .insert_fact(fact(user_id, "Plays chess", 0.9))
            .await
            .unwrap();

        let block = fx.assembler.assemble(user_id, "hello").await;
        assert_eq!(
            block.render_facts(),
            "Plays chess (confidence: 0.90, category: general)"
        );
    }

    #[tokio::test]
    async fn test_tier_changes_memory_framing() {
        let fx = fixture();
        let user_id = Uuid::new_v4();

        let free_prompt = fx.assembler.assemble(user_id, "hello").await.to_prompt();
        assert!(free_prompt.contains("limited free tier"));

        fx.entitlement.set_subscribed(user_id, true).await;
        let premium_prompt = fx.assembler.assemble(user_id, "hello").await.to_prompt();
        assert!(premium_prompt.contains("Memory: unlimited"));
    }

    #[tokio::test]
    async fn test_assembly_is_stable_apart_from_usage_touch() {
        let fx = fixture();
        let user_id = Uuid::new_v4();

        fx.sessions.record_exchange(user_id, "hi", "hello").await;
        fx.repo
            .insert_fact(fact(user_id, "Plays chess", 0.9))
            .await
            .unwrap();

        let first = fx.assembler.assemble(user_id, "hello").await;
        let second = fx.assembler.assemble(user_id, "hello").await;

        // History and customization sections are byte-identical; only the
        // facts' usage metadata moved.
        assert_eq!(first.render_history(), second.render_history());
        assert_eq!(first.profile, second.profile);
        assert_eq!(first.render_facts(), second.render_facts());
        assert_eq!(first.context_hash, second.context_hash);
        assert_eq!(second.facts[0].usage_count, 2);
    }

    #[tokio::test]
    async fn test_profile_defaults_appear_in_prompt() {
        let fx = fixture();
        let block = fx.assembler.assemble(Uuid::new_v4(), "hello").await;
        let prompt = block.to_prompt();

        assert!(prompt.contains("User's name: not stated"));
        assert!(prompt.contains("Preferred language: en"));
        assert!(prompt.contains("Personality: friendly"));
        assert!(prompt.contains("Interests: none stated"));
    }

    #[tokio::test]
    async fn test_custom_profile_is_used() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        fx.profiles
            .set_profile(
                user_id,
                CustomizationProfile {
                    display_name: Some("Wail".to_string()),
                    personality: "playful".to_string(),
                    response_style: "short".to_string(),
                    language: "fr".to_string(),
                    interests: vec!["coding".to_string(), "football".to_string()],
                },
            )
            .await;

        let prompt = fx.assembler.assemble(user_id, "salut").await.to_prompt();
        assert!(prompt.contains("User's name: Wail"));
        assert!(prompt.contains("Preferred language: fr"));
        assert!(prompt.contains("Interests: coding, football"));
    }

    #[tokio::test]
    async fn test_hash_tracks_context_changes() {
        let fx = fixture();
        let user_id = Uuid::new_v4();

        let before = fx.assembler.assemble(user_id, "hello").await;
        fx.sessions.record_exchange(user_id, "hi", "hello").await;
        let after = fx.assembler.assemble(user_id, "hello").await;

        assert_ne!(before.context_hash, after.context_hash);
    }

    #[tokio::test]
    async fn test_failing_selector_degrades_to_no_facts() {
        struct FailingRepo;

        #[async_trait::async_trait]
        impl FactRepository for FailingRepo {
            async fn list_facts(&self, _: Uuid) -> crate::Result<Vec<Fact>> {
                Err(crate::error::CompanionError::DatabaseError("down".into()))
            }
            async fn insert_fact(&self, _: Fact) -> crate::Result<()> {
                Err(crate::error::CompanionError::DatabaseError("down".into()))
            }
            async fn update_fact(&self, _: &Fact) -> crate::Result<()> {
                Err(crate::error::CompanionError::DatabaseError("down".into()))
            }
            async fn count_facts(&self, _: Uuid) -> crate::Result<u64> {
                Err(crate::error::CompanionError::DatabaseError("down".into()))
            }
            async fn select_and_touch(
                &self,
                _: Uuid,
                _: usize,
                _: Option<&[String]>,
                _: DateTime<Utc>,
            ) -> crate::Result<Vec<Fact>> {
                Err(crate::error::CompanionError::DatabaseError("down".into()))
            }
        }

        let sessions = Arc::new(SessionTracker::new());
        let selector = Arc::new(FactSelector::new(Arc::new(FailingRepo)));
        let assembler = ContextAssembler::new(
            sessions,
            selector,
            Arc::new(InMemoryProfileProvider::new()),
            Arc::new(InMemoryEntitlementProvider::new()),
        );

        let block = assembler.assemble(Uuid::new_v4(), "hello").await;
        assert!(block.facts.is_empty());
        assert_eq!(block.render_facts(), NO_FACTS_SENTINEL);
    }
}
