//! Transport abstraction: where message events come from and where
//! routed output goes.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::pipeline::types::{ChatKind, IncomingEvent, OutgoingMessage};

/// Stream of inbound message events.
pub type EventStream = Pin<Box<dyn Stream<Item = IncomingEvent> + Send>>;

/// A conversation the relay account is part of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub kind: ChatKind,
}

/// A chat platform connection.
///
/// Every outbound operation is independent: a failure is returned to the
/// caller and never retried here.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Begin receiving message events.
    async fn start(&self) -> Result<EventStream, TransportError>;

    /// Deliver a message to a chat.
    async fn send_message(
        &self,
        chat_id: i64,
        message: OutgoingMessage,
    ) -> Result<(), TransportError>;

    /// Replace the text of a message in place.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TransportError>;

    /// Whether the relay account may edit messages in this chat.
    /// Errors count as "no".
    async fn can_edit_messages(&self, chat_id: i64) -> bool;

    /// Conversations known to the transport.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, TransportError>;

    /// Upload a file.
    async fn send_document(
        &self,
        chat_id: i64,
        bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<(), TransportError>;

    /// Fetch the contents of a received file.
    async fn download_document(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}
