use companion_agent::{
    agent::CompanionAgent,
    context::ContextAssembler,
    entitlement::InMemoryEntitlementProvider,
    extraction::ExtractionScheduler,
    facts::{FactSelector, FactStore},
    gemini::MockModel,
    profile::InMemoryProfileProvider,
    quota::QuotaGate,
    session::SessionTracker,
    storage::InMemoryFactRepository,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Companion Agent demo starting");

    // Create components (in-memory, mock model)
    let sessions = Arc::new(SessionTracker::new());
    let repo = Arc::new(InMemoryFactRepository::new());
    let entitlement = Arc::new(InMemoryEntitlementProvider::new());
    let profiles = Arc::new(InMemoryProfileProvider::new());
    let quota = Arc::new(QuotaGate::new(entitlement.clone(), repo.clone()));
    let store = Arc::new(FactStore::new(repo.clone(), quota.clone()));
    let selector = Arc::new(FactSelector::new(repo.clone()));

    let model = Arc::new(MockModel::with_replies(
        "That sounds great! Tell me more. 😊",
        r#"[{"fact": "Enjoys building web applications", "confidence": 0.85, "category": "interest"}]"#,
    ));

    let assembler = ContextAssembler::new(
        sessions.clone(),
        selector,
        profiles,
        entitlement,
    );
    let scheduler = Arc::new(ExtractionScheduler::new(
        sessions.clone(),
        quota,
        store.clone(),
        model.clone(),
    ));

    let agent = CompanionAgent::new(sessions, assembler, store, scheduler, model);

    // Walk one simulated conversation through the engine. Extraction is due
    // on the 5th message.
    let user_id = Uuid::new_v4();
    let messages = [
        "Hey there!",
        "I've been learning web development lately",
        "Mostly building small apps in the evenings",
        "It's a lot of fun honestly",
        "Anyway, what should I build next?",
    ];

    for message in messages {
        let reply = agent.handle_message(user_id, message).await;
        info!(user = message, bot = %reply, "Exchange");
    }

    // Give the background extraction a moment to land.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let summary = agent.facts_summary(user_id).await?;
    info!(total = summary.total, "Facts learned about the user");
    for (category, facts) in &summary.by_category {
        for fact in facts {
            info!(category = %category, fact = %fact, "Learned");
        }
    }

    let context = agent.get_context(user_id, "What do you know about me?").await;
    println!("\n===== Assembled context =====\n{}", context.to_prompt());

    Ok(())
}
