//! Direct, interactive chat with a single node.
//!
//! Both transports record the user turn and the assistant reply in the
//! shared conversation store; a streamed reply is recorded once it has
//! arrived in full.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use aicanvas_core::error::Result;
use aicanvas_core::traits::{BackendClient, FragmentStream};
use aicanvas_core::types::{Message, NodeRequest};

use crate::conversation::SharedConversations;

pub struct NodeChat {
    client: Arc<dyn BackendClient>,
    conversations: SharedConversations,
}

impl NodeChat {
    pub fn new(client: Arc<dyn BackendClient>, conversations: SharedConversations) -> Self {
        Self {
            client,
            conversations,
        }
    }

    /// Send one turn and wait for the full reply.
    pub async fn chat(&self, request: NodeRequest) -> Result<String> {
        let node_id = request.node_id.clone();
        let user_turn = request.user_input.clone();

        let reply = self.client.send(request.with_streaming(false)).await?;
        record(&self.conversations, &node_id, user_turn, &reply);
        debug!(node_id = %node_id, chars = reply.len(), "Node chat reply recorded");
        Ok(reply)
    }

    /// Send one turn and relay the reply as it arrives.
    ///
    /// An error mid-stream is forwarded as the last item and nothing is
    /// recorded.
    pub async fn chat_stream(&self, request: NodeRequest) -> Result<FragmentStream> {
        let node_id = request.node_id.clone();
        let user_turn = request.user_input.clone();

        let mut upstream = self.client.send_stream(request.with_streaming(true)).await?;
        let (tx, rx) = mpsc::channel(64);
        let conversations = self.conversations.clone();

        tokio::spawn(async move {
            let mut full = String::new();
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(fragment) => {
                        full.push_str(&fragment);
                        if tx.send(Ok(fragment)).await.is_err() {
                            debug!(node_id = %node_id, "Chat stream receiver dropped");
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(node_id = %node_id, error = %e, "Chat stream failed");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            record(&conversations, &node_id, user_turn, &full);
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

fn record(conversations: &SharedConversations, node_id: &str, user_turn: Option<String>, reply: &str) {
    let mut store = conversations.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(text) = user_turn.filter(|t| !t.is_empty()) {
        store.append(node_id, Message::user(text));
    }
    store.append(node_id, Message::assistant(reply));
}
