//! The callee-facing seam every transport implements.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use callwire_proto::Envelope;

use crate::error::Result;
use crate::id::RequestId;
use crate::pipe::PipeReader;

/// A bound handle to a provider.
///
/// Implementations carry bytes and envelopes to one callee. Failures here are
/// plumbing failures; provider-level errors travel inside the returned
/// envelope.
#[async_trait]
pub trait CallCapability: Send + Sync + fmt::Debug {
    /// Asks the callee to create an output pipe and returns its read end.
    async fn create_output_pipe(&self, request_id: RequestId) -> Result<PipeReader>;

    /// Runs one call.
    ///
    /// `input` is the read end of the caller's input pipe. `request_id`
    /// names an output pipe created earlier with
    /// [`create_output_pipe`](Self::create_output_pipe).
    async fn execute(
        &self,
        envelope: Envelope,
        input: Option<PipeReader>,
        request_id: Option<RequestId>,
    ) -> Result<Envelope>;

    /// Runs one call that hands the callee a handle for calling back.
    async fn callback(
        &self,
        envelope: Envelope,
        handle: Arc<dyn CallCapability>,
    ) -> Result<Envelope>;

    /// Socket path a remote provider can dial to reach this capability.
    fn address(&self) -> Option<&Path> {
        None
    }

    /// Tells the callee this caller is gone. Pending pipes are dropped.
    fn release(&self) {}
}
