use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::{CanvasError, Result};
use crate::types::NodeRequest;

/// Incremental reply text, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Backend client: one call per node, streaming or not.
///
/// Implementations never retry; retry policy belongs to the caller.
pub trait BackendClient: Send + Sync + 'static {
    /// Send a node call and return the full reply text.
    ///
    /// When `request.streaming` is set and the backend streams, the reply is
    /// reassembled from its fragments before returning.
    fn send(&self, request: NodeRequest) -> BoxFuture<'_, Result<String>>;

    /// Open an incremental reply.
    fn send_stream(&self, request: NodeRequest) -> BoxFuture<'_, Result<FragmentStream>> {
        Box::pin(async move { Err(CanvasError::StreamingUnsupported(request.backend)) })
    }
}
