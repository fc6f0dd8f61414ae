//! # Confab LLM
//!
//! Unified calling surface over the model catalog, plus the RAG client.
//!
//! The five operations every mode of the gateway composes from:
//!
//! - `call_plain` - one completion, no tools.
//! - `call_plain_streaming` - deltas pushed to a channel; falls back to the
//!   non-streaming call when the stream breaks.
//! - `call_with_tools` - completion with tool schemas; a provider that
//!   rejects `tool_choice: required` is retried once with `auto`.
//! - `call_with_rag` / `call_with_rag_and_tools` - retrieve context first,
//!   then the corresponding call; RAG failure degrades to the non-RAG
//!   variant.
//!
//! `LlmBackend` is the trait the router and agent loop depend on, so tests
//! drive them with in-process mocks. The RAG dependency is injected as
//! `Arc<dyn RagRetriever>` at construction to keep the LLM<->RAG
//! relationship acyclic.

pub mod backend;
pub mod caller;
pub mod catalog;
pub mod error;
pub mod rag;
pub mod wire;

pub use backend::{LlmBackend, LlmResponse, ToolChoice};
pub use caller::HttpLlmCaller;
pub use catalog::{LlmCatalog, ModelConfig};
pub use error::{LlmError, LlmResult};
pub use rag::{HttpRagClient, RagDocument, RagMetadata, RagResponse, RagRetriever};
