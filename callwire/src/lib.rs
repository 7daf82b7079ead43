//! Cross-process calls with streamed payloads, user-interaction detours and
//! provider-to-consumer callbacks.
//!
//! A caller binds a provider through a [`Connector`], then runs calls with an
//! [`Executor`]. Each call carries an [`Envelope`] and may stream input bytes
//! to the provider and output bytes back. Providers implement [`Handler`] and
//! are served by a [`Provider`], either in-process ([`LocalConnector`]) or
//! over a Unix socket ([`socket::serve`]).
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use callwire::{Connection, Envelope, SocketConnector};
//!
//! # async fn demo() -> callwire::Result<()> {
//! let connector = Arc::new(SocketConnector::new("/run/callwire"));
//! let conn = Connection::new(connector, "echo");
//! let executor = conn.bind().await?;
//!
//! let mut out = Vec::new();
//! let outcome = executor
//!     .invoke(Envelope::new("demo.ECHO").with("message_body", "hi"), None, Some(&mut out))
//!     .await;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

#[cfg(unix)]
mod broker;
#[cfg(unix)]
mod capability;
#[cfg(unix)]
mod connection;
mod error;
#[cfg(unix)]
mod executor;
mod id;
#[cfg(unix)]
mod local;
mod outcome;
#[cfg(unix)]
mod pipe;
#[cfg(unix)]
mod registry;
pub mod reply;
#[cfg(unix)]
mod service;
#[cfg(unix)]
pub mod socket;

pub use callwire_proto::{
    API_VERSION, Envelope, ErrorDetails, Fields, FileMetadata, ResumeToken, Value, action, extra,
    result,
};
#[cfg(unix)]
pub use broker::{Broker, InputSource, Interaction, InteractionHandler};
#[cfg(unix)]
pub use capability::CallCapability;
#[cfg(unix)]
pub use connection::{Binding, Connection, Connector};
pub use error::{CallError, Error, ErrorKind, Result};
pub use id::{CallerId, RequestId};
#[cfg(unix)]
pub use executor::{Executor, ExecutorConfig};
#[cfg(unix)]
pub use local::{LocalCapability, LocalConnector};
pub use outcome::CallOutcome;
#[cfg(unix)]
pub use pipe::{PendingPipes, PipeReader, PipeWriter, pipe};
#[cfg(unix)]
pub use registry::{CallbackRegistry, Delivery, Event, Predicate, RegistrationId};
#[cfg(unix)]
pub use service::{Call, Handler, Provider, ProviderConfig};
#[cfg(unix)]
pub use socket::{SocketCapability, SocketConnector};
