use serde::Serialize;
use tokio::sync::broadcast;

use crate::answer::AnswerId;
use crate::block::{AccessType, BlockId};
use crate::user::GroupId;

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    DocumentCreated { id: BlockId, path: String },
    FolderCreated { id: BlockId, path: String },
    ParagraphChanged { doc_id: BlockId, par_id: String },
    AnswerSaved { answer_id: AnswerId, task_id: String },
    PermissionChanged { id: BlockId, group: GroupId, access: AccessType },
    ItemRenamed { id: BlockId, path: String },
    ItemDeleted { id: BlockId },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: Event) {
        tracing::trace!(?event, "event");
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.send(Event::ItemDeleted { id: 3 });
        assert_eq!(rx.recv().await.unwrap(), Event::ItemDeleted { id: 3 });
        let json = serde_json::to_value(Event::ItemDeleted { id: 3 }).unwrap();
        assert_eq!(json["type"], "ItemDeleted");
    }
}
