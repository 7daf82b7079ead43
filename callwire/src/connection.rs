//! Binding to providers and tracking whether the binding is still alive.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use callwire_proto::Envelope;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::capability::CallCapability;
use crate::error::{Error, Result};
use crate::executor::{Executor, ExecutorConfig};
use crate::id::RequestId;
use crate::pipe::PipeReader;

/// A freshly bound provider.
#[derive(Debug)]
#[non_exhaustive]
pub struct Binding {
    /// Handle to the provider.
    pub capability: Arc<dyn CallCapability>,
    /// Flips to `true` when the provider goes away.
    pub lost: watch::Receiver<bool>,
}

impl Binding {
    /// A binding whose loss is signalled through `lost`.
    pub const fn new(capability: Arc<dyn CallCapability>, lost: watch::Receiver<bool>) -> Self {
        Self { capability, lost }
    }

    /// A binding that never reports loss on its own.
    pub fn permanent(capability: Arc<dyn CallCapability>) -> Self {
        let (_, lost) = watch::channel(false);
        Self { capability, lost }
    }
}

/// Resolves provider names to capabilities.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Binds the provider published as `provider`.
    async fn bind(&self, provider: &str) -> Result<Binding>;
}

/// State of a bound connection.
#[derive(Debug)]
struct Bound {
    /// Executor over the guarded capability.
    executor: Executor,
    /// Unguarded capability, released on teardown.
    inner: Arc<dyn CallCapability>,
    /// Set to `true` to fault every call through this binding.
    closed: Arc<watch::Sender<bool>>,
}

impl Bound {
    /// Faults in-flight calls and tells the provider we are gone.
    fn tear_down(self) {
        self.closed.send_replace(true);
        self.inner.release();
    }
}

/// A possibly-bound connection to one named provider.
///
/// Disconnecting invalidates the handed-out executors: calls in flight fail
/// with a transport error and later calls fail immediately.
#[derive(Debug)]
pub struct Connection {
    /// Resolves the provider.
    connector: Arc<dyn Connector>,
    /// Provider name.
    provider: String,
    /// Caller-side settings for handed-out executors.
    config: ExecutorConfig,
    /// Current binding.
    state: Arc<Mutex<Option<Bound>>>,
}

impl Connection {
    /// Creates an unbound connection.
    pub fn new(connector: Arc<dyn Connector>, provider: impl Into<String>) -> Self {
        Self {
            connector,
            provider: provider.into(),
            config: ExecutorConfig::default(),
            state: Arc::new(Mutex::new(None)),
        }
    }

    /// Uses `config` for executors handed out after binding.
    #[must_use]
    pub const fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Provider name.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether the connection is currently bound.
    pub fn is_bound(&self) -> bool {
        lock(&self.state).is_some()
    }

    /// Executor for the current binding, if bound.
    pub fn executor(&self) -> Option<Executor> {
        lock(&self.state).as_ref().map(|b| b.executor.clone())
    }

    /// Binds the provider, reusing an existing binding.
    pub async fn bind(&self) -> Result<Executor> {
        if let Some(executor) = self.executor() {
            return Ok(executor);
        }

        let binding = self.connector.bind(&self.provider).await?;
        let (closed, closed_rx) = watch::channel(false);
        let closed = Arc::new(closed);
        let guarded = Guarded {
            inner: Arc::clone(&binding.capability),
            closed: closed_rx,
        };
        let executor = Executor::new(Arc::new(guarded)).with_config(self.config);

        {
            let mut state = lock(&self.state);
            if let Some(bound) = state.as_ref() {
                return Ok(bound.executor.clone());
            }
            *state = Some(Bound {
                executor: executor.clone(),
                inner: binding.capability,
                closed: Arc::clone(&closed),
            });
        }
        info!(provider = %self.provider, "bound");
        self.watch_loss(binding.lost, closed);
        Ok(executor)
    }

    /// Drops the binding. A no-op if unbound.
    pub fn disconnect(&self) {
        let bound = lock(&self.state).take();
        if let Some(bound) = bound {
            info!(provider = %self.provider, "disconnected");
            bound.tear_down();
        }
    }

    /// Tears the binding down when the provider reports loss.
    fn watch_loss(&self, mut lost: watch::Receiver<bool>, closed: Arc<watch::Sender<bool>>) {
        let state = Arc::clone(&self.state);
        let provider = self.provider.clone();
        let mut closed_rx = closed.subscribe();
        tokio::spawn(async move {
            let fired = tokio::select! {
                fired = async { lost.wait_for(|l| *l).await.is_ok() } => fired,
                _ = async { closed_rx.wait_for(|c| *c).await.is_ok() } => false,
            };
            if !fired {
                return;
            }
            let bound = {
                let mut state = lock(&state);
                match state.as_ref() {
                    Some(bound) if Arc::ptr_eq(&bound.closed, &closed) => state.take(),
                    _ => None,
                }
            };
            if let Some(bound) = bound {
                warn!(%provider, "provider connection lost");
                bound.tear_down();
            }
        });
    }
}

/// Locks connection state, ignoring poisoning.
fn lock(state: &Mutex<Option<Bound>>) -> MutexGuard<'_, Option<Bound>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A capability that faults once its connection is torn down.
#[derive(Debug)]
struct Guarded {
    /// Wrapped capability.
    inner: Arc<dyn CallCapability>,
    /// Becomes `true` on teardown.
    closed: watch::Receiver<bool>,
}

impl Guarded {
    /// Runs `fut` unless and until the connection is torn down.
    async fn guard<T>(&self, fut: impl Future<Output = Result<T>> + Send) -> Result<T> {
        let mut closed = self.closed.clone();
        let already = *closed.borrow_and_update();
        if already {
            return Err(Error::Disconnected);
        }
        tokio::select! {
            result = fut => result,
            true = async { closed.wait_for(|c| *c).await.is_ok() } => Err(Error::Disconnected),
        }
    }
}

#[async_trait]
impl CallCapability for Guarded {
    async fn create_output_pipe(&self, request_id: RequestId) -> Result<PipeReader> {
        self.guard(self.inner.create_output_pipe(request_id)).await
    }

    async fn execute(
        &self,
        envelope: Envelope,
        input: Option<PipeReader>,
        request_id: Option<RequestId>,
    ) -> Result<Envelope> {
        self.guard(self.inner.execute(envelope, input, request_id))
            .await
    }

    async fn callback(
        &self,
        envelope: Envelope,
        handle: Arc<dyn CallCapability>,
    ) -> Result<Envelope> {
        self.guard(self.inner.callback(envelope, handle)).await
    }

    fn address(&self) -> Option<&Path> {
        self.inner.address()
    }

    fn release(&self) {
        self.inner.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use callwire_proto::Fields;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::{CallError, ErrorKind};
    use crate::local::LocalConnector;
    use crate::id::CallerId;
    use crate::reply;
    use crate::service::{Call, Handler, Provider};

    /// Blocks `test.HANG` until notified; answers everything else.
    struct Hang(Arc<Notify>);

    #[async_trait]
    impl Handler for Hang {
        async fn execute(&self, call: &mut Call) -> Envelope {
            if call.envelope.action() == "test.HANG" {
                self.0.notify_one();
                std::future::pending::<()>().await;
            }
            reply::success(Fields::new())
        }
    }

    fn published() -> (Arc<LocalConnector>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let connector = Arc::new(LocalConnector::new(CallerId::from(1)));
        connector.publish("hang", Arc::new(Provider::new(Hang(Arc::clone(&started)))));
        (connector, started)
    }

    #[tokio::test]
    async fn unknown_provider_fails_to_bind() {
        let (connector, _) = published();
        let conn = Connection::new(connector, "missing");
        assert!(matches!(conn.bind().await, Err(Error::ProviderNotFound(_))));
        assert!(!conn.is_bound());
    }

    #[tokio::test]
    async fn bind_is_reused_until_disconnect() {
        let (connector, _) = published();
        let conn = Connection::new(connector, "hang");
        let executor = conn.bind().await.unwrap();
        assert!(conn.is_bound());
        assert!(conn.bind().await.is_ok());

        conn.disconnect();
        assert!(!conn.is_bound());
        let outcome = executor.invoke(Envelope::new("test.OK"), None, None).await;
        assert_eq!(outcome.error().map(CallError::kind), Some(ErrorKind::Transport));
    }

    #[tokio::test]
    async fn disconnect_faults_in_flight_call() {
        let (connector, started) = published();
        let conn = Connection::new(connector, "hang");
        let executor = conn.bind().await.unwrap();

        let call = tokio::spawn(async move {
            let mut out = Vec::new();
            executor
                .invoke(Envelope::new("test.HANG"), None, Some(&mut out))
                .await
        });
        started.notified().await;
        conn.disconnect();

        let outcome = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .expect("in-flight call was not faulted")
            .unwrap();
        assert_eq!(outcome.error().map(CallError::kind), Some(ErrorKind::Transport));
    }

    #[tokio::test]
    async fn withdrawn_provider_unbinds_connection() {
        let (connector, started) = published();
        let conn = Connection::new(Arc::clone(&connector) as Arc<dyn Connector>, "hang");
        let executor = conn.bind().await.unwrap();

        let call = tokio::spawn(async move {
            executor.invoke(Envelope::new("test.HANG"), None, None).await
        });
        started.notified().await;
        assert!(connector.withdraw("hang"));

        let outcome = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .expect("in-flight call was not faulted")
            .unwrap();
        assert_eq!(outcome.error().map(CallError::kind), Some(ErrorKind::Transport));
        tokio::time::timeout(Duration::from_secs(5), async {
            while conn.is_bound() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connection stayed bound");
    }
}
