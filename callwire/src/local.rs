//! In-process transport: providers and callers sharing one runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use callwire_proto::Envelope;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::capability::CallCapability;
use crate::connection::{Binding, Connector};
use crate::error::{Error, Result};
use crate::id::{CallerId, RequestId};
use crate::pipe::PipeReader;
use crate::service::Provider;

/// Capability over a provider in this process.
///
/// Holds the provider weakly: once its owner drops it, calls fail with
/// [`Error::Disconnected`].
#[derive(Debug, Clone)]
pub struct LocalCapability {
    /// Target provider.
    provider: Weak<Provider>,
    /// Identity presented to the provider.
    caller: CallerId,
}

impl LocalCapability {
    /// Creates a capability calling `provider` as `caller`.
    pub fn new(provider: &Arc<Provider>, caller: CallerId) -> Self {
        Self {
            provider: Arc::downgrade(provider),
            caller,
        }
    }

    /// The provider, if it is still alive.
    fn provider(&self) -> Result<Arc<Provider>> {
        self.provider.upgrade().ok_or(Error::Disconnected)
    }
}

#[async_trait]
impl CallCapability for LocalCapability {
    async fn create_output_pipe(&self, request_id: RequestId) -> Result<PipeReader> {
        self.provider()?.create_output_pipe(self.caller, request_id)
    }

    async fn execute(
        &self,
        envelope: Envelope,
        input: Option<PipeReader>,
        request_id: Option<RequestId>,
    ) -> Result<Envelope> {
        let provider = self.provider()?;
        Ok(provider.execute(self.caller, envelope, input, request_id).await)
    }

    async fn callback(
        &self,
        envelope: Envelope,
        handle: Arc<dyn CallCapability>,
    ) -> Result<Envelope> {
        let provider = self.provider()?;
        Ok(provider.callback(self.caller, envelope, handle).await)
    }

    fn release(&self) {
        if let Ok(provider) = self.provider() {
            provider.disconnect(self.caller);
        }
    }
}

/// A published provider.
#[derive(Debug)]
struct Published {
    /// The provider itself.
    provider: Arc<Provider>,
    /// Flipped to `true` on withdrawal.
    lost: watch::Sender<bool>,
}

/// Named providers living in this process.
#[derive(Debug)]
pub struct LocalConnector {
    /// Identity presented to bound providers.
    caller: CallerId,
    /// Published providers by name.
    providers: Mutex<HashMap<String, Published>>,
}

impl Default for LocalConnector {
    fn default() -> Self {
        Self::new(CallerId::current())
    }
}

impl LocalConnector {
    /// Creates an empty connector binding as `caller`.
    pub fn new(caller: CallerId) -> Self {
        Self {
            caller,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes `provider` under `name`, withdrawing any previous one.
    pub fn publish(&self, name: impl Into<String>, provider: Arc<Provider>) {
        let name = name.into();
        let (lost, _) = watch::channel(false);
        let previous = self.lock().insert(name.clone(), Published { provider, lost });
        if let Some(previous) = previous {
            previous.lost.send_replace(true);
        }
        info!(provider = %name, "provider published");
    }

    /// Withdraws `name`. Connections bound to it are torn down.
    pub fn withdraw(&self, name: &str) -> bool {
        let Some(published) = self.lock().remove(name) else {
            return false;
        };
        published.lost.send_replace(true);
        info!(provider = %name, "provider withdrawn");
        true
    }

    /// Locks the provider table, ignoring poisoning.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Published>> {
        self.providers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn bind(&self, provider: &str) -> Result<Binding> {
        let (capability, lost) = {
            let providers = self.lock();
            let published = providers
                .get(provider)
                .ok_or_else(|| Error::ProviderNotFound(provider.to_owned()))?;
            (
                LocalCapability::new(&published.provider, self.caller),
                published.lost.subscribe(),
            )
        };
        debug!(%provider, caller = %self.caller, "binding local provider");
        Ok(Binding::new(Arc::new(capability), lost))
    }
}
