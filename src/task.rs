use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A long-lived unit of work supervised by the main join set.
#[async_trait]
pub trait Task {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, cancel: CancellationToken) -> anyhow::Result<()>;
}
