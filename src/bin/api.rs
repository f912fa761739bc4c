use companion_agent::{
    agent::CompanionAgent,
    api::start_server,
    context::ContextAssembler,
    entitlement::InMemoryEntitlementProvider,
    extraction::ExtractionScheduler,
    facts::{FactSelector, FactStore},
    gemini::{GeminiClient, GenerationModel, MockModel},
    profile::InMemoryProfileProvider,
    quota::QuotaGate,
    session::SessionTracker,
    storage::{FactRepository, InMemoryFactRepository, PostgresFactRepository},
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let model: Arc<dyn GenerationModel> = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Arc::new(GeminiClient::new(key)),
        _ => {
            eprintln!("⚠️  GEMINI_API_KEY not set in .env");
            eprintln!("📌 Running with the mock model; replies are canned");
            Arc::new(MockModel::new())
        }
    };

    let repo: Arc<dyn FactRepository> = match std::env::var("DATABASE_URL") {
        Ok(url) => match PostgresFactRepository::connect_lazy(&url) {
            Ok(repo) => {
                info!("Fact store backend: postgres");
                Arc::new(repo)
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres fact store, falling back to in-memory: {}",
                    error
                );
                Arc::new(InMemoryFactRepository::new())
            }
        },
        Err(_) => {
            info!("Fact store backend: in-memory");
            Arc::new(InMemoryFactRepository::new())
        }
    };

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Companion Agent - API Server");
    info!("📍 Port: {}", api_port);

    // Create components
    let sessions = Arc::new(SessionTracker::new());
    let entitlement = Arc::new(InMemoryEntitlementProvider::new());
    let profiles = Arc::new(InMemoryProfileProvider::new());
    let quota = Arc::new(QuotaGate::new(entitlement.clone(), repo.clone()));
    let store = Arc::new(FactStore::new(repo.clone(), quota.clone()));
    let selector = Arc::new(FactSelector::new(repo.clone()));

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

    let agent = Arc::new(CompanionAgent::new(
        sessions,
        assembler,
        store,
        scheduler,
        model,
    ));

    info!("✅ Agent initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(agent, api_port).await?;

    Ok(())
}
