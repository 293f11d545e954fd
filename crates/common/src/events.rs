use async_trait::async_trait;

use crate::error::ClientError;
use crate::msg::NodeMsg;

/// Receives what a node event reader observes.
///
/// `connected` and `connect_error` are called while opening the stream,
/// `message` once per decoded notification and `read_end` exactly once
/// when reading stops for any reason.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn message(&self, msg: NodeMsg);
    fn read_end(&self);
    fn connected(&self);
    fn connect_error(&self, error: &ClientError);
}
