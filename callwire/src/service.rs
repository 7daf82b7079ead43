//! Callee side: the provider that owns pending pipes and runs handlers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use callwire_proto::{API_VERSION, Envelope, ErrorDetails, Fields, action, extra};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::capability::CallCapability;
use crate::error::Result;
use crate::id::{CallerId, RequestId};
use crate::pipe::{PendingPipes, PipeReader, PipeWriter};
use crate::reply;

/// One call as handed to a [`Handler`].
///
/// Streams the handler leaves in place are closed once it returns.
#[derive(Debug)]
#[non_exhaustive]
pub struct Call {
    /// Calling peer.
    pub caller: CallerId,
    /// Request envelope.
    pub envelope: Envelope,
    /// Output pipe the caller opened for this call, if any.
    pub request_id: Option<RequestId>,
    /// Caller's input bytes, if any.
    pub input: Option<PipeReader>,
    /// Sink for output bytes, if the caller asked for them.
    pub output: Option<PipeWriter>,
}

impl Call {
    /// Closes whatever streams are still attached.
    async fn close(&mut self) {
        self.input = None;
        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.shutdown().await {
                warn!(caller = %self.caller, error = %e, "failed to close output pipe");
            }
        }
    }
}

/// Provider-specific call semantics.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Runs one call and returns its result envelope (see [`reply`]).
    async fn execute(&self, call: &mut Call) -> Envelope;

    /// Runs one call carrying a callback handle.
    async fn callback(
        &self,
        _caller: CallerId,
        _envelope: Envelope,
        _handle: Arc<dyn CallCapability>,
    ) -> Envelope {
        reply::error(ErrorDetails::GENERIC_ERROR, "callbacks are not supported")
    }

    /// A caller went away.
    fn disconnected(&self, _caller: CallerId) {}
}

/// Version policy of a [`Provider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Requests declaring a lower version are refused.
    pub min_api_version: i32,
    /// Versions reported by `GET_SUPPORTED_VERSIONS`.
    pub supported_versions: Vec<i32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            min_api_version: API_VERSION,
            supported_versions: vec![API_VERSION],
        }
    }
}

/// A callee endpoint.
///
/// Owns the pending output pipes of all its callers and runs each call on
/// its own task so a panicking handler cannot take the provider down.
pub struct Provider {
    /// Call semantics.
    handler: Arc<dyn Handler>,
    /// Output pipes awaiting their call.
    pipes: PendingPipes,
    /// Version policy.
    config: ProviderConfig,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("pipes", &self.pipes)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Provider {
    /// Creates a provider with the default version policy.
    pub fn new(handler: impl Handler) -> Self {
        Self::with_config(handler, ProviderConfig::default())
    }

    /// Creates a provider with an explicit version policy.
    pub fn with_config(handler: impl Handler, config: ProviderConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            pipes: PendingPipes::new(),
            config,
        }
    }

    /// Version policy.
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Pending output pipes.
    pub const fn pipes(&self) -> &PendingPipes {
        &self.pipes
    }

    /// Creates an output pipe for `caller`, returning its read end.
    pub fn create_output_pipe(
        &self,
        caller: CallerId,
        request_id: RequestId,
    ) -> Result<PipeReader> {
        let reader = self.pipes.create(caller, request_id)?;
        debug!(%caller, %request_id, "output pipe created");
        Ok(reader)
    }

    /// Takes the write end of a pending output pipe.
    pub fn consume_output_pipe(
        &self,
        caller: CallerId,
        request_id: RequestId,
    ) -> Result<PipeWriter> {
        self.pipes.consume(caller, request_id)
    }

    /// Runs one call and returns its result envelope.
    ///
    /// Input and output streams are closed on every path before this
    /// returns.
    pub async fn execute(
        &self,
        caller: CallerId,
        envelope: Envelope,
        input: Option<PipeReader>,
        request_id: Option<RequestId>,
    ) -> Envelope {
        let output = match request_id {
            Some(id) => match self.consume_output_pipe(caller, id) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    warn!(
                        %caller,
                        action = envelope.action(),
                        error = %e,
                        "call names unknown output pipe"
                    );
                    return reply::error(ErrorDetails::GENERIC_ERROR, e.to_string());
                }
            },
            None => None,
        };

        if let Some(refusal) = self.admit(&envelope) {
            return refusal;
        }

        let call = Call {
            caller,
            envelope,
            request_id,
            input,
            output,
        };
        let handler = Arc::clone(&self.handler);
        let task = tokio::spawn(async move {
            let mut call = call;
            let result = handler.execute(&mut call).await;
            call.close().await;
            result
        });
        finish(caller, task.await)
    }

    /// Runs one call carrying a callback handle.
    pub async fn callback(
        &self,
        caller: CallerId,
        envelope: Envelope,
        handle: Arc<dyn CallCapability>,
    ) -> Envelope {
        if let Some(refusal) = self.admit(&envelope) {
            return refusal;
        }
        let handler = Arc::clone(&self.handler);
        let task = tokio::spawn(async move { handler.callback(caller, envelope, handle).await });
        finish(caller, task.await)
    }

    /// Forgets a caller: its pending pipes are closed and the handler is told.
    pub fn disconnect(&self, caller: CallerId) {
        let dropped = self.pipes.discard_caller(caller);
        info!(%caller, dropped, "caller disconnected");
        self.handler.disconnected(caller);
    }

    /// Answers version queries and refuses outdated requests.
    fn admit(&self, envelope: &Envelope) -> Option<Envelope> {
        if envelope.action() == action::GET_SUPPORTED_VERSIONS {
            let mut fields = Fields::new();
            fields.insert(
                extra::SUPPORTED_VERSIONS.to_owned(),
                self.config.supported_versions.clone().into(),
            );
            return Some(reply::success(fields));
        }
        if envelope.api_version() < self.config.min_api_version {
            debug!(
                version = envelope.api_version(),
                min = self.config.min_api_version,
                "refusing outdated request"
            );
            return Some(reply::error(
                ErrorDetails::INCOMPATIBLE_API_VERSIONS,
                format!(
                    "request declares api version {}, provider requires at least {}",
                    envelope.api_version(),
                    self.config.min_api_version
                ),
            ));
        }
        None
    }
}

/// Turns a handler task's join result into a result envelope.
fn finish(
    caller: CallerId,
    joined: std::result::Result<Envelope, tokio::task::JoinError>,
) -> Envelope {
    let mut envelope = joined.unwrap_or_else(|e| {
        error!(%caller, error = %e, "handler failed");
        reply::error(ErrorDetails::GENERIC_ERROR, format!("handler failed: {e}"))
    });
    envelope.set_api_version(API_VERSION);
    envelope
}
