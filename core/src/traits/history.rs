use crate::state::Message;
use async_trait::async_trait;

/// External sink that receives every message the pool appends to its state.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, message: &Message) -> anyhow::Result<()>;

    async fn messages(&self) -> anyhow::Result<Vec<Message>>;

    async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.messages().await?.len())
    }

    async fn clear(&self) -> anyhow::Result<()>;
}
