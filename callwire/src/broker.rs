//! Interaction broker: resolves `InteractionRequired` detours and retries.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use callwire_proto::{Envelope, Fields, ResumeToken};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::capability::CallCapability;
use crate::error::CallError;
use crate::executor::Executor;
use crate::outcome::CallOutcome;
use crate::pipe::PipeReader;

/// The user's answer to an interaction request.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Interaction {
    /// Proceed; these fields are merged into the original request.
    Resumed(Fields),
    /// The user declined.
    Cancelled,
}

/// UI collaborator that resolves resume tokens.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    /// Shows the interaction behind `token` for the paused `request`.
    async fn interact(&self, token: &ResumeToken, request: &Envelope) -> Interaction;
}

/// Input bytes that can be replayed for every attempt of a call.
pub trait InputSource: Send {
    /// Opens a fresh reader positioned at the start.
    fn open(&mut self) -> io::Result<PipeReader>;
}

impl InputSource for Vec<u8> {
    fn open(&mut self) -> io::Result<PipeReader> {
        Ok(PipeReader::new(io::Cursor::new(self.clone())))
    }
}

impl InputSource for PathBuf {
    fn open(&mut self) -> io::Result<PipeReader> {
        let file = std::fs::File::open(&*self)?;
        Ok(PipeReader::new(tokio::fs::File::from_std(file)))
    }
}

/// Runs calls to completion, detouring through the UI when asked.
#[derive(Debug)]
pub struct Broker<H> {
    /// Runs each attempt.
    executor: Executor,
    /// Resolves interaction tokens.
    handler: H,
}

impl<H: InteractionHandler> Broker<H> {
    /// Creates a broker over `executor`.
    pub const fn new(executor: Executor, handler: H) -> Self {
        Self { executor, handler }
    }

    /// The underlying executor.
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Runs `envelope` until it succeeds, fails, or the user cancels.
    ///
    /// Each resumption merges the answer into the original request and
    /// reopens `input`. Every attempt writes into its own buffer; only the
    /// last attempt's bytes reach `output`.
    pub async fn run(
        &self,
        mut envelope: Envelope,
        mut input: Option<&mut (dyn InputSource + '_)>,
        output: Option<&mut (dyn AsyncWrite + Send + Unpin + '_)>,
    ) -> CallOutcome {
        let mut rounds = 0_u32;
        loop {
            let opened = input.as_deref_mut().map(|source| source.open()).transpose();
            let mut reader = match opened {
                Ok(reader) => reader,
                Err(e) => {
                    return CallOutcome::Error(CallError::transport("failed to open call input", e));
                }
            };
            let mut attempt = Vec::new();
            let outcome = self
                .executor
                .invoke(
                    envelope.clone(),
                    reader
                        .as_mut()
                        .map(|r| r as &mut (dyn AsyncRead + Send + Unpin)),
                    output
                        .is_some()
                        .then_some(&mut attempt as &mut (dyn AsyncWrite + Send + Unpin)),
                )
                .await;

            let token = match outcome {
                CallOutcome::InteractionRequired(token) => token,
                other => return commit(other, &attempt, output).await,
            };
            if !attempt.is_empty() {
                debug!(bytes = attempt.len(), "discarding output of paused attempt");
            }
            match self.handler.interact(&token, &envelope).await {
                Interaction::Resumed(extra) => {
                    rounds += 1;
                    debug!(action = envelope.action(), rounds, "resuming after interaction");
                    envelope.merge(extra);
                }
                Interaction::Cancelled => {
                    info!(action = envelope.action(), "interaction cancelled by user");
                    return CallOutcome::Error(CallError::UserCancelled);
                }
            }
        }
    }

    /// Runs a callback-carrying call until it succeeds, fails, or the user
    /// cancels, resuming the same way as [`run`](Self::run).
    pub async fn run_callback(
        &self,
        mut envelope: Envelope,
        handle: Arc<dyn CallCapability>,
    ) -> CallOutcome {
        loop {
            let token = match self
                .executor
                .callback(envelope.clone(), Arc::clone(&handle))
                .await
            {
                CallOutcome::InteractionRequired(token) => token,
                other => return other,
            };
            match self.handler.interact(&token, &envelope).await {
                Interaction::Resumed(extra) => {
                    debug!(action = envelope.action(), "resuming callback after interaction");
                    envelope.merge(extra);
                }
                Interaction::Cancelled => {
                    info!(action = envelope.action(), "interaction cancelled by user");
                    return CallOutcome::Error(CallError::UserCancelled);
                }
            }
        }
    }
}

/// Hands the final attempt's bytes to the caller's sink.
async fn commit(
    outcome: CallOutcome,
    bytes: &[u8],
    output: Option<&mut (dyn AsyncWrite + Send + Unpin + '_)>,
) -> CallOutcome {
    let Some(sink) = output else {
        return outcome;
    };
    let written = match sink.write_all(bytes).await {
        Ok(()) => sink.flush().await,
        Err(e) => Err(e),
    };
    match written {
        Err(e) if outcome.is_success() => {
            CallOutcome::Error(CallError::transport("failed to write call output", e))
        }
        Err(e) => {
            debug!(error = %e, "failed to write output of failed call");
            outcome
        }
        Ok(()) => outcome,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::error::ErrorKind;
    use crate::local::LocalCapability;
    use crate::id::CallerId;
    use crate::reply;
    use crate::service::{Call, Handler, Provider};

    /// Needs `grant` then `confirm` before it writes the input back.
    struct TwoStep;

    #[async_trait]
    impl Handler for TwoStep {
        async fn execute(&self, call: &mut Call) -> Envelope {
            let mut body = Vec::new();
            if let Some(input) = call.input.as_mut() {
                let _ = input.read_to_end(&mut body).await;
            }
            for step in ["grant", "confirm"] {
                if call.envelope.get_bool(step) != Some(true) {
                    return reply::interaction_required(ResumeToken::new(step.as_bytes().to_vec()));
                }
            }
            if let Some(output) = call.output.as_mut() {
                let _ = output.write_all(&body).await;
            }
            reply::success(Fields::new())
        }
    }

    /// Writes `attempt;` on every attempt, asking once for `grant`.
    struct Eager;

    #[async_trait]
    impl Handler for Eager {
        async fn execute(&self, call: &mut Call) -> Envelope {
            if let Some(output) = call.output.as_mut() {
                let _ = output.write_all(b"attempt;").await;
            }
            if call.envelope.get_bool("grant") == Some(true) {
                reply::success(Fields::new())
            } else {
                reply::interaction_required(ResumeToken::new(b"grant".to_vec()))
            }
        }

        async fn callback(
            &self,
            _caller: CallerId,
            envelope: Envelope,
            handle: Arc<dyn CallCapability>,
        ) -> Envelope {
            if envelope.get_bool("grant") != Some(true) {
                return reply::interaction_required(ResumeToken::new(b"grant".to_vec()));
            }
            let mut answer = Fields::new();
            answer.insert("addressed".to_owned(), handle.address().is_some().into());
            reply::success(answer)
        }
    }

    /// Approves whatever step the token names.
    #[derive(Default)]
    struct Approve {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl InteractionHandler for Approve {
        async fn interact(&self, token: &ResumeToken, _request: &Envelope) -> Interaction {
            self.seen.fetch_add(1, Ordering::Relaxed);
            let step = String::from_utf8_lossy(token.as_bytes()).into_owned();
            Interaction::Resumed(Fields::from([(step, true.into())]))
        }
    }

    struct Decline;

    #[async_trait]
    impl InteractionHandler for Decline {
        async fn interact(&self, _token: &ResumeToken, _request: &Envelope) -> Interaction {
            Interaction::Cancelled
        }
    }

    fn executor(provider: &Arc<Provider>) -> Executor {
        Executor::new(Arc::new(LocalCapability::new(provider, CallerId::from(1))))
    }

    #[tokio::test]
    async fn chained_resumption_reaches_success() {
        let provider = Arc::new(Provider::new(TwoStep));
        let broker = Broker::new(executor(&provider), Approve::default());

        let mut input = b"payload".to_vec();
        let mut out = Vec::new();
        let outcome = broker
            .run(Envelope::new("test.TWO_STEP"), Some(&mut input), Some(&mut out))
            .await;

        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(broker.handler.seen.load(Ordering::Relaxed), 2);
        assert_eq!(out, b"payload");
    }

    #[tokio::test]
    async fn only_final_attempt_output_is_kept() {
        let provider = Arc::new(Provider::new(Eager));
        let broker = Broker::new(executor(&provider), Approve::default());

        let mut out = Vec::new();
        let outcome = broker
            .run(Envelope::new("test.EAGER"), None, Some(&mut out))
            .await;

        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(broker.handler.seen.load(Ordering::Relaxed), 1);
        assert_eq!(out, b"attempt;");
    }

    #[tokio::test]
    async fn cancelled_run_writes_nothing() {
        let provider = Arc::new(Provider::new(Eager));
        let broker = Broker::new(executor(&provider), Decline);

        let mut out = Vec::new();
        let outcome = broker
            .run(Envelope::new("test.EAGER"), None, Some(&mut out))
            .await;

        assert_eq!(outcome.error().map(CallError::kind), Some(ErrorKind::UserCancelled));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn callback_registration_resumes_after_interaction() {
        let provider = Arc::new(Provider::new(Eager));
        let broker = Broker::new(executor(&provider), Approve::default());
        let handle: Arc<dyn CallCapability> =
            Arc::new(LocalCapability::new(&provider, CallerId::from(2)));

        let outcome = broker
            .run_callback(Envelope::new("test.REGISTER"), handle)
            .await;

        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(broker.handler.seen.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn declined_callback_is_user_cancelled() {
        let provider = Arc::new(Provider::new(Eager));
        let broker = Broker::new(executor(&provider), Decline);
        let handle: Arc<dyn CallCapability> =
            Arc::new(LocalCapability::new(&provider, CallerId::from(2)));

        let outcome = broker
            .run_callback(Envelope::new("test.REGISTER"), handle)
            .await;
        assert_eq!(outcome.error().map(CallError::kind), Some(ErrorKind::UserCancelled));
    }

    #[tokio::test]
    async fn cancellation_is_user_cancelled() {
        let provider = Arc::new(Provider::new(TwoStep));
        let broker = Broker::new(executor(&provider), Decline);

        let outcome = broker.run(Envelope::new("test.TWO_STEP"), None, None).await;
        assert_eq!(outcome.error().map(CallError::kind), Some(ErrorKind::UserCancelled));
    }

    #[tokio::test]
    async fn file_input_is_reopened_per_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, b"from file").unwrap();

        let provider = Arc::new(Provider::new(TwoStep));
        let broker = Broker::new(executor(&provider), Approve::default());
        let mut input = path;
        let mut out = Vec::new();
        let outcome = broker
            .run(Envelope::new("test.TWO_STEP"), Some(&mut input), Some(&mut out))
            .await;

        assert!(outcome.is_success());
        assert_eq!(out, b"from file");
    }

    #[tokio::test]
    async fn missing_input_file_is_transport_error() {
        let provider = Arc::new(Provider::new(TwoStep));
        let broker = Broker::new(executor(&provider), Decline);
        let mut input = PathBuf::from("/nonexistent/callwire-input");
        let outcome = broker
            .run(Envelope::new("test.TWO_STEP"), Some(&mut input), None)
            .await;
        assert_eq!(outcome.error().map(CallError::kind), Some(ErrorKind::Transport));
    }
}
