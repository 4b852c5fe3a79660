//! Room chat.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use watchparty_core::{Identity, Message, RoomId, keyspace, normalize_text, ordered_messages};

use crate::store::{StoreConnector, StoreError, encode};

/// Write half of the chat log. Cheap to clone; the synchronizer holds one to
/// post play/pause notices.
#[derive(Clone)]
pub struct ChatWriter {
    store: Arc<dyn StoreConnector>,
    room_id: RoomId,
    self_id: Identity,
    display_name: String,
}

impl ChatWriter {
    pub fn new(
        store: Arc<dyn StoreConnector>,
        room_id: RoomId,
        self_id: Identity,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            room_id,
            self_id,
            display_name: display_name.into(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Append a chat line. Blank text sends nothing and yields `None`.
    pub async fn send_message(&self, text: &str) -> Result<Option<String>, StoreError> {
        let Some(text) = normalize_text(text) else {
            return Ok(None);
        };
        let message = Message::user(self.self_id.clone(), self.display_name.clone(), text);
        let key = self.push(&message).await?;
        Ok(Some(key))
    }

    /// Append a room notice authored by `system`.
    pub async fn post_system_notice(&self, text: &str) -> Result<String, StoreError> {
        self.push(&Message::system(text)).await
    }

    async fn push(&self, message: &Message) -> Result<String, StoreError> {
        self.store
            .push(&keyspace::messages(&self.room_id), encode(message)?)
            .await
    }
}

/// Chat log of the active room, kept sorted by server timestamp.
pub struct MessagingChannel {
    writer: ChatWriter,
    log: watch::Receiver<Vec<Message>>,
    task: Option<JoinHandle<()>>,
}

impl MessagingChannel {
    pub fn attach(writer: ChatWriter) -> Self {
        let (log_tx, log) = watch::channel(Vec::new());
        let mut subscription = writer
            .store
            .subscribe_value(&keyspace::messages(&writer.room_id));
        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                log_tx.send_replace(ordered_messages(snapshot.as_ref()));
            }
        });

        Self {
            writer,
            log,
            task: Some(task),
        }
    }

    pub fn writer(&self) -> &ChatWriter {
        &self.writer
    }

    pub async fn send_message(&self, text: &str) -> Result<Option<String>, StoreError> {
        self.writer.send_message(text).await
    }

    pub async fn post_system_notice(&self, text: &str) -> Result<String, StoreError> {
        self.writer.post_system_notice(text).await
    }

    /// Current log, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.log.borrow().clone()
    }

    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.log.clone()
    }

    pub async fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for MessagingChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
