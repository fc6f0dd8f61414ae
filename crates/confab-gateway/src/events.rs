//! Named lifecycle events with async listeners.
//!
//! Listeners for an event run in parallel; a listener failure is logged and
//! never aborts the event or the message being processed. Registration
//! happens at startup, so the listener table is read-mostly.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use confab_core::GatewayResult;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error};

/// Session lifecycle events observable by listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    SessionStarted,
    SessionEnded,
    BeforeMessageProcessing,
    BeforeUserMessageAdded,
    AfterUserMessageAdded,
    BeforeLlmCall,
    AfterLlmCall,
    AfterAssistantMessageAdded,
    BeforeResponseSend,
    AfterResponseSend,
    MessageError,
    SessionError,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionStarted => "session_started",
            SessionEvent::SessionEnded => "session_ended",
            SessionEvent::BeforeMessageProcessing => "before_message_processing",
            SessionEvent::BeforeUserMessageAdded => "before_user_message_added",
            SessionEvent::AfterUserMessageAdded => "after_user_message_added",
            SessionEvent::BeforeLlmCall => "before_llm_call",
            SessionEvent::AfterLlmCall => "after_llm_call",
            SessionEvent::AfterAssistantMessageAdded => "after_assistant_message_added",
            SessionEvent::BeforeResponseSend => "before_response_send",
            SessionEvent::AfterResponseSend => "after_response_send",
            SessionEvent::MessageError => "message_error",
            SessionEvent::SessionError => "session_error",
        }
    }
}

/// Payload handed to every listener.
#[derive(Debug, Clone)]
pub struct EventPayload {
    pub session_id: String,
    pub user: String,
    pub data: Value,
}

type ListenerFuture = Pin<Box<dyn Future<Output = GatewayResult<()>> + Send>>;

pub type EventListener = Arc<dyn Fn(EventPayload) -> ListenerFuture + Send + Sync>;

#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<HashMap<SessionEvent, Vec<EventListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event: SessionEvent, listener: EventListener) {
        // A poisoned table is recovered; listener vectors stay usable.
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push(listener);
        debug!(event = event.name(), "registered event listener");
    }

    /// Run all listeners for the event in parallel. Failures are logged per
    /// listener; the event always completes.
    pub async fn emit(&self, event: SessionEvent, payload: EventPayload) {
        let listeners: Vec<EventListener> = {
            let table = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            match table.get(&event) {
                Some(listeners) => listeners.clone(),
                None => return,
            }
        };

        let results = join_all(listeners.iter().map(|l| l(payload.clone()))).await;
        for result in results {
            if let Err(e) = result {
                error!(event = event.name(), "event listener failed: {e}");
            }
        }
    }
}
