//! Prompt assembly

use crate::retrieval::RetrievedChunk;
use crate::session::{ChatTurn, Role};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Bodhi, a knowledgeable assistant. \
Answer the user's question using the document context below when it is relevant. \
If the context does not contain the answer, say so and answer from general knowledge. \
Be concise and cite the document name when you rely on a passage.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        }
    }
}

/// Role-tagged message sent to the responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Build the message list for one turn
///
/// Order: system preamble with the context passages in rank order, then the
/// prior history, then the new query. `history` must not already contain the
/// query.
pub fn build_prompt(
    system_prompt: &str,
    query: &str,
    context: &[RetrievedChunk],
    history: &[ChatTurn],
) -> Vec<ChatMessage> {
    let mut system = String::from(system_prompt);

    if context.is_empty() {
        system.push_str("\n\nNo document context was found for this question.");
    } else {
        system.push_str("\n\nDocument context:\n");
        for (i, chunk) in context.iter().enumerate() {
            system.push_str(&format!(
                "\n[{}] ({})\n{}\n",
                i + 1,
                chunk.document_name,
                chunk.text
            ));
        }
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new(MessageRole::System, system));
    messages.extend(
        history
            .iter()
            .map(|turn| ChatMessage::new(turn.role.into(), turn.content.clone())),
    );
    messages.push(ChatMessage::new(MessageRole::User, query));

    messages
}
