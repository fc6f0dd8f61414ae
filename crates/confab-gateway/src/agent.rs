//! Iterative agent execution.
//!
//! The agent loop lets the model call tools repeatedly until it invokes the
//! synthetic completion tool or runs out of steps. Each step is one
//! tool-required LLM call; tool outputs become the next step's input. The
//! loop performs at most `max_steps + 1` LLM calls, the final one being the
//! completion follow-up or the max-steps summary.

use std::sync::Arc;

use confab_core::schema::ToolSchema;
use confab_core::{GatewayResult, Message, ServerFrame};
use confab_llm::{LlmBackend, ToolChoice};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::executor::{ToolExecutor, UpdateSender};
use crate::session::Session;

/// The synthetic completion signal. Added to the schema per agent call and
/// never registered in the general tool registry.
pub const COMPLETION_TOOL: &str = "all_work_done";

const AGENT_SYSTEM_PROMPT: &str = "You are an autonomous agent working on behalf of {user}. \
Work through the task step by step using the tools available to you. \
Each of your responses must select a tool. When, and only when, the entire \
task is finished, call the all_work_done tool to signal completion.";

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    CompletionTool,
    MaxSteps,
    EmptyResponse,
    Error,
}

#[derive(Debug)]
pub struct AgentOutcome {
    pub response: String,
    pub steps: u32,
    pub reason: CompletionReason,
}

pub struct AgentLoop {
    backend: Arc<dyn LlmBackend>,
    executor: Arc<ToolExecutor>,
}

impl AgentLoop {
    pub fn new(backend: Arc<dyn LlmBackend>, executor: Arc<ToolExecutor>) -> Self {
        Self { backend, executor }
    }

    fn completion_tool_schema() -> ToolSchema {
        ToolSchema::function(
            COMPLETION_TOOL,
            "Call this when you have completely finished all the work requested by the user. \
             Only call it once the entire task is done and no further steps are needed.",
            json!({"type": "object", "properties": {}}),
        )
    }

    /// Replace a leading system prompt with the agent-specific one.
    fn agent_messages(base: &[Message], user: &str) -> Vec<Message> {
        let mut messages = base.to_vec();
        let prompt = AGENT_SYSTEM_PROMPT.replace("{user}", user);
        match messages.first() {
            Some(first) if matches!(first.role, confab_core::Role::System) => {
                messages[0] = Message::system(prompt);
            }
            _ => messages.insert(0, Message::system(prompt)),
        }
        messages
    }

    /// Run the loop. `base_messages` is the conversation so far (the turn's
    /// user message excluded); `initial_content` is the user's request.
    pub async fn run(
        &self,
        session: &mut Session,
        model: &str,
        initial_content: &str,
        base_messages: Vec<Message>,
        tools: Vec<ToolSchema>,
        max_steps: u32,
        updates: &UpdateSender,
    ) -> AgentOutcome {
        let mut schema = tools;
        schema.push(Self::completion_tool_schema());

        let _ = updates.send(ServerFrame::AgentStart {
            max_steps,
            tool_count: schema.len(),
        });

        let base = Self::agent_messages(&base_messages, &session.user);
        let mut current_input = initial_content.to_string();
        let mut step: u32 = 0;

        while step < max_steps {
            step += 1;
            let _ = updates.send(ServerFrame::AgentTurnStart {
                step,
                max_steps,
            });

            match self
                .run_step(session, model, &base, &current_input, &schema, step, updates)
                .await
            {
                Ok(StepOutcome::Completed(response)) => {
                    let _ = updates.send(ServerFrame::AgentCompletion { step });
                    info!(step, "agent completed via completion tool");
                    return AgentOutcome {
                        response,
                        steps: step,
                        reason: CompletionReason::CompletionTool,
                    };
                }
                Ok(StepOutcome::Continue(next_input)) => {
                    if next_input.trim().is_empty() {
                        warn!(step, "agent step produced no output, terminating");
                        return AgentOutcome {
                            response: "The agent returned an empty response.".to_string(),
                            steps: step,
                            reason: CompletionReason::EmptyResponse,
                        };
                    }
                    current_input = next_input;
                }
                Err(e) => {
                    let _ = updates.send(ServerFrame::AgentError {
                        step,
                        error: e.user_message(),
                    });
                    return AgentOutcome {
                        response: format!("Agent stopped after an error: {}", e.user_message()),
                        steps: step,
                        reason: CompletionReason::Error,
                    };
                }
            }
        }

        let _ = updates.send(ServerFrame::AgentMaxSteps { max_steps });
        let summary = self
            .max_steps_summary(model, initial_content, &current_input, step)
            .await;
        AgentOutcome {
            response: format!("{summary}\n\n[Agent stopped after reaching the maximum of {max_steps} steps]"),
            steps: step,
            reason: CompletionReason::MaxSteps,
        }
    }

    /// One step: a tool-required LLM call, tool execution, and either the
    /// completion follow-up or the concatenated results for the next step.
    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        session: &mut Session,
        model: &str,
        base: &[Message],
        current_input: &str,
        schema: &[ToolSchema],
        step: u32,
        updates: &UpdateSender,
    ) -> GatewayResult<StepOutcome> {
        let mut messages = base.to_vec();
        messages.push(Message::user(current_input));

        let _ = updates.send(ServerFrame::AgentLlmCall {
            step,
            message_count: messages.len(),
            tool_count: schema.len(),
        });

        let response = self
            .backend
            .call_with_tools(model, &messages, schema, ToolChoice::Required)
            .await?;

        if !response.has_tool_calls() {
            // The model must pick a tool each step; bare text ends the step.
            return Ok(StepOutcome::Continue(response.text()));
        }

        for call in &response.tool_calls {
            let arguments: Value = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::Null);
            let _ = updates.send(ServerFrame::AgentToolCall {
                step,
                tool: call.function.name.clone(),
                arguments,
            });
        }

        let results = self
            .executor
            .execute_tool_calls(&response.tool_calls, session, updates)
            .await;
        let _ = updates.send(ServerFrame::AgentToolResults {
            step,
            count: results.len(),
        });

        let completion_used = response
            .tool_calls
            .iter()
            .any(|call| call.function.name == COMPLETION_TOOL);

        if completion_used {
            let _ = updates.send(ServerFrame::AgentCompletionDetected { step });

            // Follow-up over the full exchange, no tools, to get the final
            // natural-language answer.
            let mut follow_up = messages.clone();
            follow_up.push(Message::assistant_with_tool_calls(
                response.text(),
                response.tool_calls.clone(),
            ));
            for result in &results {
                follow_up.push(Message::tool(result.tool_call_id.clone(), result.content.clone()));
            }

            let final_response = self
                .backend
                .call_with_tools(model, &follow_up, &[], ToolChoice::None)
                .await?;
            let answer = match final_response.content {
                Some(content) if !content.trim().is_empty() => content,
                _ => results
                    .last()
                    .map(|r| r.content.clone())
                    .unwrap_or_else(|| "Task complete.".to_string()),
            };
            return Ok(StepOutcome::Completed(answer));
        }

        let next_input = results
            .iter()
            .map(|r| format!("Tool result: {}", r.content))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(StepOutcome::Continue(next_input))
    }

    /// Summarize a run that hit the step bound. A failing summary call falls
    /// back to the raw final content.
    async fn max_steps_summary(
        &self,
        model: &str,
        original_request: &str,
        final_content: &str,
        steps: u32,
    ) -> String {
        let prompt = format!(
            "The user requested: \"{original_request}\"\n\n\
             An agent worked on this for {steps} steps without finishing. Its most \
             recent progress was:\n{final_content}\n\n\
             Summarize for the user what was accomplished, what remains, and any \
             important findings."
        );
        match self
            .backend
            .call_plain(model, &[Message::user(prompt)], None)
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => final_content.to_string(),
            Err(e) => {
                warn!("max-steps summary call failed: {e}");
                final_content.to_string()
            }
        }
    }
}

enum StepOutcome {
    Completed(String),
    Continue(String),
}
