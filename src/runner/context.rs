//! Scenario Context
//!
//! Everything a scenario body can touch: the agent handle (which keeps
//! the conversation transcript), the bound assertion surface, the
//! optional profile, and a free-form scores map. Each scenario gets a
//! fresh context; nothing here is shared across scenarios.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::assertions::Assert;
use crate::types::{
    AgentAdapter, AgentProfile, AgentResponse, ChatMessage, ConversationContext,
    ConversationTurn, TurnRole,
};

/// Sends persona messages and records both sides of the exchange. The
/// accumulated context is re-sent with every request, so the agent
/// needs no server-side session.
#[derive(Clone)]
pub struct AgentHandle {
    adapter: Arc<dyn AgentAdapter>,
    turns: Arc<Mutex<Vec<ConversationTurn>>>,
    context: Arc<Mutex<ConversationContext>>,
}

impl AgentHandle {
    pub fn new(adapter: Arc<dyn AgentAdapter>, turns: Arc<Mutex<Vec<ConversationTurn>>>) -> Self {
        Self {
            adapter,
            turns,
            context: Arc::new(Mutex::new(ConversationContext::default())),
        }
    }

    pub async fn send(&self, message: &str) -> Result<AgentResponse> {
        self.turns.lock().unwrap().push(ConversationTurn {
            role: TurnRole::Persona,
            content: message.to_string(),
            latency_ms: None,
        });

        // Snapshot the context so no lock is held across the await.
        let snapshot = self.context.lock().unwrap().clone();
        let response = self.adapter.send(message, Some(&snapshot)).await?;

        {
            let mut context = self.context.lock().unwrap();
            context.turns.push(ChatMessage::user(message));
            context.turns.push(ChatMessage::assistant(response.text.clone()));
        }

        self.turns.lock().unwrap().push(ConversationTurn {
            role: TurnRole::Agent,
            content: response.text.clone(),
            latency_ms: Some(response.latency_ms),
        });

        Ok(response)
    }
}

#[derive(Clone)]
pub struct ScenarioContext {
    pub agent: AgentHandle,
    pub assert: Assert,
    pub profile: Option<Arc<AgentProfile>>,
    /// Free-form scenario-owned scores, available to reporting.
    pub scores: Arc<Mutex<HashMap<String, f64>>>,
    pub conversation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoAdapter;

    #[async_trait]
    impl AgentAdapter for EchoAdapter {
        async fn send(
            &self,
            message: &str,
            context: Option<&ConversationContext>,
        ) -> Result<AgentResponse> {
            let prior = context.map(|c| c.turns.len()).unwrap_or(0);
            Ok(AgentResponse {
                text: format!("echo[{}]: {}", prior, message),
                tool_calls: Vec::new(),
                latency_ms: 5,
                token_usage: None,
                raw: None,
            })
        }
    }

    #[tokio::test]
    async fn test_send_records_both_turns() {
        let turns = Arc::new(Mutex::new(Vec::new()));
        let handle = AgentHandle::new(Arc::new(EchoAdapter), turns.clone());

        let response = handle.send("hello").await.unwrap();
        assert_eq!(response.text, "echo[0]: hello");

        let recorded = turns.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].role, TurnRole::Persona);
        assert_eq!(recorded[1].role, TurnRole::Agent);
        assert_eq!(recorded[1].latency_ms, Some(5));
    }

    #[tokio::test]
    async fn test_context_accumulates_across_sends() {
        let turns = Arc::new(Mutex::new(Vec::new()));
        let handle = AgentHandle::new(Arc::new(EchoAdapter), turns);

        handle.send("first").await.unwrap();
        let second = handle.send("second").await.unwrap();
        // Two prior turns (user + assistant) were re-sent.
        assert_eq!(second.text, "echo[2]: second");
    }
}
