//! In-process transport that records everything sent through it.
//!
//! Used for dry runs and tests: events are injected with [`MemoryTransport::push`]
//! and outbound operations are captured as [`Delivery`] values.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::channels::transport::{Conversation, EventStream, Transport};
use crate::error::TransportError;
use crate::pipeline::types::{IncomingEvent, OutgoingMessage};

/// One recorded outbound operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent {
        chat_id: i64,
        message: OutgoingMessage,
    },
    Edited {
        chat_id: i64,
        message_id: i64,
        text: String,
    },
    Deleted {
        chat_id: i64,
        message_id: i64,
    },
    Document {
        chat_id: i64,
        file_name: String,
        bytes: Vec<u8>,
        caption: Option<String>,
    },
}

impl Delivery {
    pub fn chat_id(&self) -> i64 {
        match self {
            Self::Sent { chat_id, .. }
            | Self::Edited { chat_id, .. }
            | Self::Deleted { chat_id, .. }
            | Self::Document { chat_id, .. } => *chat_id,
        }
    }
}

/// Recording transport.
pub struct MemoryTransport {
    deliveries: Mutex<Vec<Delivery>>,
    editable: Mutex<HashSet<i64>>,
    failing: Mutex<HashSet<i64>>,
    undeletable: Mutex<HashSet<i64>>,
    conversations: Mutex<Vec<Conversation>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    inbox_tx: mpsc::UnboundedSender<IncomingEvent>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingEvent>>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            deliveries: Mutex::new(Vec::new()),
            editable: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            undeletable: Mutex::new(HashSet::new()),
            conversations: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            inbox_tx: tx,
            inbox_rx: Mutex::new(Some(rx)),
        }
    }

    /// Queue an inbound event for the stream returned by `start`.
    pub fn push(&self, event: IncomingEvent) {
        if self.inbox_tx.send(event).is_err() {
            tracing::warn!("Memory transport inbox closed");
        }
    }

    /// Grant edit rights in a chat.
    pub async fn allow_edits(&self, chat_id: i64) {
        self.editable.lock().await.insert(chat_id);
    }

    /// Make every send to this chat fail.
    pub async fn fail_sends_to(&self, chat_id: i64) {
        self.failing.lock().await.insert(chat_id);
    }

    /// Make every delete in this chat fail, as without admin rights.
    pub async fn deny_deletes_in(&self, chat_id: i64) {
        self.undeletable.lock().await.insert(chat_id);
    }

    pub async fn add_conversation(&self, conversation: Conversation) {
        self.conversations.lock().await.push(conversation);
    }

    /// Make a file downloadable under `file_id`.
    pub async fn add_file(&self, file_id: &str, bytes: Vec<u8>) {
        self.files.lock().await.insert(file_id.to_string(), bytes);
    }

    /// Everything recorded so far, oldest first.
    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().await.clone()
    }

    /// Recorded sends to one chat.
    pub async fn sent_to(&self, chat_id: i64) -> Vec<OutgoingMessage> {
        self.deliveries
            .lock()
            .await
            .iter()
            .filter_map(|d| match d {
                Delivery::Sent { chat_id: c, message } if *c == chat_id => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.deliveries.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn start(&self) -> Result<EventStream, TransportError> {
        let rx = self
            .inbox_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| TransportError::StartupFailed {
                name: "memory".into(),
                reason: "already started".into(),
            })?;

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn send_message(
        &self,
        chat_id: i64,
        message: OutgoingMessage,
    ) -> Result<(), TransportError> {
        if self.failing.lock().await.contains(&chat_id) {
            return Err(TransportError::SendFailed {
                chat_id,
                reason: "chat not found".into(),
            });
        }
        self.deliveries
            .lock()
            .await
            .push(Delivery::Sent { chat_id, message });
        Ok(())
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TransportError> {
        self.deliveries.lock().await.push(Delivery::Edited {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError> {
        if self.undeletable.lock().await.contains(&chat_id) {
            return Err(TransportError::DeleteFailed {
                chat_id,
                message_id,
                reason: "not enough rights".into(),
            });
        }
        self.deliveries.lock().await.push(Delivery::Deleted {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn can_edit_messages(&self, chat_id: i64) -> bool {
        self.editable.lock().await.contains(&chat_id)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        Ok(self.conversations.lock().await.clone())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        self.deliveries.lock().await.push(Delivery::Document {
            chat_id,
            file_name: file_name.to_string(),
            bytes,
            caption: caption.map(String::from),
        });
        Ok(())
    }

    async fn download_document(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        self.files
            .lock()
            .await
            .get(file_id)
            .cloned()
            .ok_or_else(|| TransportError::DownloadFailed {
                file_id: file_id.to_string(),
                reason: "unknown file".into(),
            })
    }
}
