//! Bounded conversation history for the brain orchestrator.
//!
//! Mirrors the role-tagged chat-message list a chat-completions API expects,
//! with the truncation discipline spec.md §3 requires: the system prompt at
//! index 0 is never evicted, and the tail is capped at `2 * max_turns`
//! messages (one user + one assistant message per turn).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    /// Present only on `Role::Tool` messages, echoing the call they answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl HistoryMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A single session's chat history, system prompt pinned at index 0.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<HistoryMessage>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        Self {
            messages: vec![HistoryMessage::system(system_prompt)],
            max_turns,
        }
    }

    pub fn messages(&self) -> &[HistoryMessage] {
        &self.messages
    }

    pub fn push(&mut self, message: HistoryMessage) {
        self.messages.push(message);
        self.truncate();
    }

    /// Keep the system prompt plus the last `2 * max_turns` messages.
    fn truncate(&mut self) {
        let max_messages = self.max_turns * 2 + 1;
        if self.messages.len() > max_messages {
            let tail_len = max_messages - 1;
            let tail_start = self.messages.len() - tail_len;
            let system = self.messages[0].clone();
            let mut kept = Vec::with_capacity(max_messages);
            kept.push(system);
            kept.extend(self.messages[tail_start..].iter().cloned());
            self.messages = kept;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_system_prompt_only() {
        let h = ConversationHistory::new("you are a helper", 10);
        assert_eq!(h.messages().len(), 1);
        assert_eq!(h.messages()[0].role, Role::System);
    }

    #[test]
    fn appends_in_order() {
        let mut h = ConversationHistory::new("sys", 10);
        h.push(HistoryMessage::user("hi"));
        h.push(HistoryMessage::assistant("hello"));
        assert_eq!(h.messages().len(), 3);
        assert_eq!(h.messages()[1].content, "hi");
        assert_eq!(h.messages()[2].content, "hello");
    }

    #[test]
    fn truncates_keeping_system_and_tail() {
        let mut h = ConversationHistory::new("sys", 2);
        for i in 0..10 {
            h.push(HistoryMessage::user(format!("u{i}")));
            h.push(HistoryMessage::assistant(format!("a{i}")));
        }
        // max_turns=2 -> cap at 2*2+1 = 5 messages
        assert_eq!(h.messages().len(), 5);
        assert_eq!(h.messages()[0].role, Role::System);
        // last two turns survive
        assert_eq!(h.messages()[1].content, "u8");
        assert_eq!(h.messages()[2].content, "a8");
        assert_eq!(h.messages()[3].content, "u9");
        assert_eq!(h.messages()[4].content, "a9");
    }

    #[test]
    fn never_evicts_system_even_under_heavy_truncation() {
        let mut h = ConversationHistory::new("pinned", 1);
        for i in 0..50 {
            h.push(HistoryMessage::user(format!("turn {i}")));
        }
        assert_eq!(h.messages()[0].content, "pinned");
        assert_eq!(h.messages()[0].role, Role::System);
    }

    #[test]
    fn tool_messages_carry_call_id() {
        let mut h = ConversationHistory::new("sys", 10);
        h.push(HistoryMessage::tool("42", "call_abc"));
        assert_eq!(h.messages()[1].tool_call_id.as_deref(), Some("call_abc"));
    }
}
