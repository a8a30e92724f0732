use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use aicanvas_core::types::{Message, ParentContext, Role};

/// Conversation store shared between the orchestrator and the HTTP surface.
pub type SharedConversations = Arc<Mutex<ConversationStore>>;

/// Per-node ordered message history.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<String, Vec<Message>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedConversations {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn append(&mut self, node_id: &str, message: Message) {
        self.conversations
            .entry(node_id.to_string())
            .or_default()
            .push(message);
    }

    /// Full history of a node; empty when it has none.
    pub fn history(&self, node_id: &str) -> Vec<Message> {
        self.conversations.get(node_id).cloned().unwrap_or_default()
    }

    pub fn last_assistant_message(&self, node_id: &str) -> Option<Message> {
        self.conversations
            .get(node_id)?
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .cloned()
    }

    pub fn has_user_turn(&self, node_id: &str) -> bool {
        self.conversations
            .get(node_id)
            .is_some_and(|msgs| msgs.iter().any(|m| m.role == Role::User))
    }

    /// The node's most recent reply, as seen by its dependents.
    pub fn parent_context(&self, node_id: &str) -> ParentContext {
        ParentContext {
            node_id: node_id.to_string(),
            last_response: self
                .last_assistant_message(node_id)
                .map(|m| m.content)
                .unwrap_or_default(),
        }
    }

    /// Drop a node's history. Returns whether there was any.
    pub fn clear(&mut self, node_id: &str) -> bool {
        self.conversations.remove(node_id).is_some()
    }

    /// Every conversation, ordered by node id.
    pub fn export_all(&self) -> BTreeMap<String, Vec<Message>> {
        self.conversations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace all conversations.
    pub fn import_all(&mut self, conversations: impl IntoIterator<Item = (String, Vec<Message>)>) {
        self.conversations = conversations.into_iter().collect();
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
