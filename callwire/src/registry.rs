//! Provider-side registry of consumer callbacks and event fan-out.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use callwire_proto::{Envelope, ErrorDetails, Fields, extra};
use tracing::{debug, info, warn};

use crate::capability::CallCapability;
use crate::error::{CallError, Error, Result};
use crate::executor::{Executor, ExecutorConfig};
use crate::outcome::CallOutcome;
use crate::id::CallerId;
use crate::reply;

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationId(u64);

impl RegistrationId {
    /// The raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for RegistrationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg-{}", self.0)
    }
}

/// Which events a registration wants.
///
/// Unset optional parts match anything; set parts must match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    /// Account the events belong to.
    account: String,
    /// Peer domain.
    domain: Option<String>,
    /// Peer local part. Only meaningful with a domain.
    local_part: Option<String>,
}

impl Predicate {
    /// Creates a predicate.
    ///
    /// Fails if `account` is empty or `local_part` is given without `domain`.
    pub fn new(
        account: impl Into<String>,
        domain: Option<String>,
        local_part: Option<String>,
    ) -> Result<Self> {
        let account = account.into();
        if account.is_empty() {
            return Err(Error::InvalidRegistration("account is required".to_owned()));
        }
        if local_part.is_some() && domain.is_none() {
            return Err(Error::InvalidRegistration(
                "local part requires a domain".to_owned(),
            ));
        }
        Ok(Self {
            account,
            domain,
            local_part,
        })
    }

    /// Reads a predicate from the predicate fields of `envelope`.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let account = envelope
            .get_str(extra::ACCOUNT_JID)
            .ok_or_else(|| Error::InvalidRegistration(format!("missing {}", extra::ACCOUNT_JID)))?;
        Self::new(
            account,
            envelope.get_str(extra::JID_DOMAIN).map(str::to_owned),
            envelope.get_str(extra::JID_LOCAL_PART).map(str::to_owned),
        )
    }

    /// Required account.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Whether `event` satisfies every set part.
    pub fn matches(&self, event: &Event) -> bool {
        fn part(want: Option<&String>, have: Option<&String>) -> bool {
            want.is_none_or(|w| have == Some(w))
        }
        self.account == event.account
            && part(self.domain.as_ref(), event.domain.as_ref())
            && part(self.local_part.as_ref(), event.local_part.as_ref())
    }
}

/// Something that happened on the provider and may interest callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Account the event belongs to.
    account: String,
    /// Peer domain.
    domain: Option<String>,
    /// Peer local part.
    local_part: Option<String>,
    /// What is delivered to matching callbacks.
    envelope: Envelope,
}

impl Event {
    /// An event with no peer address.
    pub fn new(account: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            account: account.into(),
            domain: None,
            local_part: None,
            envelope,
        }
    }

    /// An event whose peer is `local@domain/resource`.
    ///
    /// The resource is ignored. An address without `@` is a bare domain.
    pub fn from_jid(account: impl Into<String>, peer: &str, envelope: Envelope) -> Self {
        let bare = peer.split_once('/').map_or(peer, |(bare, _)| bare);
        let (local_part, domain) = match bare.split_once('@') {
            Some((local, domain)) => (Some(local.to_owned()), domain),
            None => (None, bare),
        };
        Self {
            account: account.into(),
            domain: (!domain.is_empty()).then(|| domain.to_owned()),
            local_part: local_part.filter(|l| !l.is_empty()),
            envelope,
        }
    }

    /// Sets the peer domain.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the peer local part.
    #[must_use]
    pub fn local_part(mut self, local_part: impl Into<String>) -> Self {
        self.local_part = Some(local_part.into());
        self
    }

    /// The envelope sent to callbacks.
    pub const fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

/// Result of delivering an event to one registration.
#[derive(Debug)]
#[non_exhaustive]
pub struct Delivery {
    /// Registration that was called.
    pub id: RegistrationId,
    /// How the callback call ended.
    pub outcome: CallOutcome,
}

impl Delivery {
    /// Whether the callback acknowledged the event.
    pub const fn accepted(&self) -> bool {
        self.outcome.is_success()
    }

    /// The failure, if the callback did not accept the event.
    pub const fn error(&self) -> Option<&CallError> {
        self.outcome.error()
    }
}

/// One live registration.
#[derive(Debug)]
struct Registration {
    /// Which events to deliver.
    predicate: Predicate,
    /// Caller that registered, for teardown.
    owner: Option<CallerId>,
    /// Where to deliver.
    handle: Arc<dyn CallCapability>,
}

/// Registrations of one provider.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    /// Id source.
    next_id: AtomicU64,
    /// Live registrations.
    entries: Mutex<HashMap<RegistrationId, Registration>>,
    /// Settings for delivery calls.
    config: ExecutorConfig,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `config` for delivery calls.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a registration not tied to any caller.
    pub fn register(
        &self,
        predicate: Predicate,
        handle: Arc<dyn CallCapability>,
    ) -> RegistrationId {
        self.insert(predicate, None, handle)
    }

    /// Adds a registration removed again by [`drop_owner`](Self::drop_owner).
    pub fn register_for(
        &self,
        owner: CallerId,
        predicate: Predicate,
        handle: Arc<dyn CallCapability>,
    ) -> RegistrationId {
        self.insert(predicate, Some(owner), handle)
    }

    /// Removes a registration. Returns whether it existed.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        debug!(%id, removed, "callback unregistered");
        removed
    }

    /// Removes every registration made by `owner`.
    pub fn drop_owner(&self, owner: CallerId) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, reg| reg.owner != Some(owner));
        let dropped = before - entries.len();
        if dropped > 0 {
            info!(%owner, dropped, "callbacks dropped with their owner");
        }
        dropped
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether there are no registrations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every matching registration.
    ///
    /// Each delivery runs on its own task. One failing callback does not
    /// affect the others; its failure is reported in its [`Delivery`].
    pub async fn deliver(&self, event: &Event) -> Vec<Delivery> {
        let targets: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, reg)| reg.predicate.matches(event))
            .map(|(id, reg)| (*id, Arc::clone(&reg.handle)))
            .collect();
        debug!(
            action = event.envelope.action(),
            targets = targets.len(),
            "delivering event"
        );

        let tasks: Vec<_> = targets
            .into_iter()
            .map(|(id, handle)| {
                let executor = Executor::new(handle).with_config(self.config);
                let envelope = event.envelope.clone();
                let task = tokio::spawn(async move { executor.invoke(envelope, None, None).await });
                (id, task)
            })
            .collect();

        let mut deliveries = Vec::with_capacity(tasks.len());
        for (id, task) in tasks {
            let outcome = CallOutcome::from_join(task.await);
            if let CallOutcome::Error(e) = &outcome {
                warn!(%id, error = %e, "callback delivery failed");
            }
            deliveries.push(Delivery { id, outcome });
        }
        deliveries
    }

    /// Serves a register request carrying predicate fields.
    ///
    /// Answers with the new id in `registration_id`, or with an
    /// `INVALID_REGISTRATION` error.
    pub fn handle_register(
        &self,
        caller: CallerId,
        envelope: &Envelope,
        handle: Arc<dyn CallCapability>,
    ) -> Envelope {
        match Predicate::from_envelope(envelope) {
            Ok(predicate) => {
                let id = self.register_for(caller, predicate, handle);
                let id = i64::try_from(id.get()).unwrap_or(i64::MAX);
                reply::success(Fields::from([(extra::REGISTRATION_ID.to_owned(), id.into())]))
            }
            Err(e) => {
                debug!(%caller, error = %e, "registration rejected");
                reply::error(ErrorDetails::INVALID_REGISTRATION, e.to_string())
            }
        }
    }

    /// Serves an unregister request naming `registration_id`.
    pub fn handle_unregister(&self, caller: CallerId, envelope: &Envelope) -> Envelope {
        let Some(id) = envelope
            .get_long(extra::REGISTRATION_ID)
            .and_then(|id| u64::try_from(id).ok())
        else {
            return reply::error(
                ErrorDetails::INVALID_REGISTRATION,
                format!("missing {}", extra::REGISTRATION_ID),
            );
        };
        let id = RegistrationId(id);
        let owned = self
            .lock()
            .get(&id)
            .is_some_and(|reg| reg.owner.is_none_or(|owner| owner == caller));
        if owned && self.unregister(id) {
            reply::success(Fields::new())
        } else {
            reply::error(
                ErrorDetails::INVALID_REGISTRATION,
                format!("no registration {id} for {caller}"),
            )
        }
    }

    /// Stores a registration under a fresh id.
    fn insert(
        &self,
        predicate: Predicate,
        owner: Option<CallerId>,
        handle: Arc<dyn CallCapability>,
    ) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!(%id, account = predicate.account(), "callback registered");
        self.lock().insert(
            id,
            Registration {
                predicate,
                owner,
                handle,
            },
        );
        id
    }

    /// Locks the registration table, ignoring poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RegistrationId, Registration>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
