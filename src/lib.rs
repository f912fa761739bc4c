//! Companion Agent
//!
//! A conversational assistant core that remembers users across messages
//! even though every generation call is stateless:
//! - Tracks per-user sessions with numbered message history
//! - Learns confidence-scored facts about users in the background
//! - Assembles history + facts + preferences into each generation request
//! - Caps stored facts for free-tier users
//!
//! PER MESSAGE:
//! ASSEMBLE CONTEXT → GENERATE → RECORD EXCHANGE → SCHEDULE EXTRACTION

pub mod agent;
pub mod api;
pub mod context;
pub mod entitlement;
pub mod error;
pub mod extraction;
pub mod facts;
pub mod gemini;
pub mod models;
pub mod profile;
pub mod quota;
pub mod session;
pub mod storage;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::CompanionAgent;
