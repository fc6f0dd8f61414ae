//! # Confab Gateway
//!
//! The orchestration core of Confab: everything between a WebSocket frame
//! arriving and a `chat_response` (or `agent_final_response`, or `error`)
//! going back.
//!
//! A turn flows ingest -> auth -> classify -> execute: the pipeline appends
//! the user message, the mode router picks plain / RAG-only / RAG+LLM /
//! tools / RAG+tools / agent execution, the tool executor rewrites
//! arguments (username injection, tokenized file URLs) and hands artifacts
//! through storage, and every intermediate event streams back through the
//! connection's update channel. Exactly one terminal frame reaches the
//! client per turn.

pub mod agent;
pub mod config;
pub mod events;
pub mod executor;
pub mod filter;
pub mod http;
pub mod pipeline;
pub mod router;
pub mod session;
pub mod state;
pub mod ws;

pub use config::{AppSettings, ConfigManager};
pub use pipeline::MessagePipeline;
pub use session::{Session, SessionManager};
pub use state::AppState;
