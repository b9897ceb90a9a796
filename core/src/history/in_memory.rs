use crate::state::Message;
use crate::traits::HistoryStore;
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryHistory {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, message: &Message) -> anyhow::Result<()> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn messages(&self) -> anyhow::Result<Vec<Message>> {
        Ok(self.messages.read().await.clone())
    }

    async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.messages.read().await.len())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.messages.write().await.clear();
        Ok(())
    }
}
