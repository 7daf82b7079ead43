//! Caller side: runs one call across the boundary with its byte streams.

use std::io;
use std::sync::Arc;

use callwire_proto::{API_VERSION, Envelope};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capability::CallCapability;
use crate::error::CallError;
use crate::outcome::CallOutcome;
use crate::id::RequestId;
use crate::pipe::{PipeReader, PipeWriter, pipe};

/// Caller-side settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Version stamped into every outgoing envelope.
    pub api_version: i32,
}

impl ExecutorConfig {
    /// Overrides the stamped api version.
    #[must_use]
    pub const fn api_version(mut self, version: i32) -> Self {
        self.api_version = version;
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION,
        }
    }
}

/// Where the boundary call stands, as seen by the stream tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The callee is still running.
    Running,
    /// The callee returned a result envelope.
    Returned,
    /// The boundary call itself failed.
    Failed,
}

/// Runs calls against one bound capability.
///
/// Cheap to clone. Calls never serialise on each other.
#[derive(Debug, Clone)]
pub struct Executor {
    /// Bound callee.
    capability: Arc<dyn CallCapability>,
    /// Caller-side settings.
    config: ExecutorConfig,
}

impl Executor {
    /// Creates an executor with the default config.
    pub fn new(capability: Arc<dyn CallCapability>) -> Self {
        Self {
            capability,
            config: ExecutorConfig::default(),
        }
    }

    /// Replaces the config.
    #[must_use]
    pub const fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// The bound callee.
    pub const fn capability(&self) -> &Arc<dyn CallCapability> {
        &self.capability
    }

    /// Runs one call.
    ///
    /// Bytes from `input` are pumped to the callee while it runs. Bytes the
    /// callee writes are copied into `output` and flushed before this
    /// returns. Every pipe opened here is closed on every path.
    pub async fn invoke(
        &self,
        mut envelope: Envelope,
        input: Option<&mut (dyn AsyncRead + Send + Unpin + '_)>,
        output: Option<&mut (dyn AsyncWrite + Send + Unpin + '_)>,
    ) -> CallOutcome {
        envelope.set_api_version(self.config.api_version);

        let mut callee_input = None;
        let mut pump = None;
        if let Some(source) = input {
            match pipe() {
                Ok((reader, writer)) => {
                    callee_input = Some(reader);
                    pump = Some((source, writer));
                }
                Err(e) => {
                    return CallOutcome::Error(CallError::transport("failed to open input pipe", e));
                }
            }
        }

        let mut request_id = None;
        let mut drain = None;
        if let Some(sink) = output {
            let id = RequestId::next();
            match self.capability.create_output_pipe(id).await {
                Ok(reader) => {
                    request_id = Some(id);
                    drain = Some((reader, sink));
                }
                Err(e) => {
                    let e = CallError::transport("failed to open output pipe", e);
                    return CallOutcome::Error(e);
                }
            }
        }

        let action = envelope.action().to_owned();
        debug!(%action, request_id = request_id.map(RequestId::get), "invoking");

        let (phase_tx, phase_rx) = watch::channel(Phase::Running);
        let call = async {
            let result = self
                .capability
                .execute(envelope, callee_input, request_id)
                .await;
            phase_tx.send_replace(if result.is_ok() {
                Phase::Returned
            } else {
                Phase::Failed
            });
            result
        };
        let (result, drained, ()) = tokio::join!(
            call,
            drain_output(drain, phase_rx.clone()),
            pump_input(pump, phase_rx)
        );

        let outcome = match result {
            Ok(reply) => CallOutcome::from_result(reply),
            Err(e) => {
                warn!(%action, error = %e, "call failed in transport");
                return CallOutcome::Error(CallError::transport(format!("call {action} failed"), e));
            }
        };
        match drained {
            Err(e) if outcome.is_success() => {
                warn!(%action, error = %e, "output stream broke");
                CallOutcome::Error(CallError::transport("output stream broke", e))
            }
            Err(e) => {
                debug!(%action, error = %e, "output stream broke after failed call");
                outcome
            }
            Ok(bytes) => {
                debug!(%action, bytes, "call finished");
                outcome
            }
        }
    }

    /// Runs one call on the multi-thread pool.
    ///
    /// Requires the multi-thread runtime. On a current-thread runtime detached
    /// calls no longer overlap.
    ///
    /// `output` is shut down once the call finishes. Await the handle and
    /// pass it through [`CallOutcome::from_join`].
    pub fn invoke_detached(
        &self,
        envelope: Envelope,
        input: Option<PipeReader>,
        output: Option<PipeWriter>,
    ) -> JoinHandle<CallOutcome> {
        let executor = self.clone();
        tokio::spawn(async move {
            let mut input = input;
            let mut output = output;
            let outcome = executor
                .invoke(
                    envelope,
                    input.as_mut().map(|r| r as &mut (dyn AsyncRead + Send + Unpin)),
                    output.as_mut().map(|w| w as &mut (dyn AsyncWrite + Send + Unpin)),
                )
                .await;
            if let Some(mut output) = output {
                if let Err(e) = output.shutdown().await {
                    debug!(error = %e, "failed to close detached output");
                }
            }
            outcome
        })
    }

    /// Runs one call handing the callee `handle` for calling back.
    pub async fn callback(
        &self,
        mut envelope: Envelope,
        handle: Arc<dyn CallCapability>,
    ) -> CallOutcome {
        envelope.set_api_version(self.config.api_version);
        let action = envelope.action().to_owned();
        match self.capability.callback(envelope, handle).await {
            Ok(reply) => CallOutcome::from_result(reply),
            Err(e) => {
                warn!(%action, error = %e, "callback call failed in transport");
                CallOutcome::Error(CallError::transport(format!("call {action} failed"), e))
            }
        }
    }
}

/// Copies the callee's output into the caller's sink.
///
/// Gives up as soon as the boundary call fails, since the write end may
/// never close.
async fn drain_output(
    drain: Option<(PipeReader, &mut (dyn AsyncWrite + Send + Unpin + '_))>,
    mut phase: watch::Receiver<Phase>,
) -> io::Result<u64> {
    let Some((mut reader, sink)) = drain else {
        return Ok(0);
    };
    let copied = tokio::select! {
        copied = tokio::io::copy(&mut reader, &mut *sink) => copied?,
        true = async { phase.wait_for(|p| *p == Phase::Failed).await.is_ok() } => {
            debug!("output drain cancelled");
            return Ok(0);
        }
    };
    sink.flush().await?;
    Ok(copied)
}

/// Feeds the caller's input into the callee's pipe.
///
/// Stops once the callee has returned; the write end is dropped on exit so
/// the callee sees EOF.
async fn pump_input(
    pump: Option<(&mut (dyn AsyncRead + Send + Unpin + '_), PipeWriter)>,
    mut phase: watch::Receiver<Phase>,
) {
    let Some((source, mut writer)) = pump else {
        return;
    };
    let forward = async {
        let n = tokio::io::copy(source, &mut writer).await?;
        writer.shutdown().await?;
        Ok::<_, io::Error>(n)
    };
    tokio::select! {
        pumped = forward => match pumped {
            Ok(bytes) => debug!(bytes, "input pumped"),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("callee closed its input early");
            }
            Err(e) => warn!(error = %e, "input pump failed"),
        },
        true = async { phase.wait_for(|p| *p != Phase::Running).await.is_ok() } => {
            debug!("callee returned before input was drained");
        }
    }
}
