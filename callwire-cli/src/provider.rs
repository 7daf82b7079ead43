//! `callwire serve`: a demo provider.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use callwire::{
    Call, CallCapability, CallbackRegistry, CallerId, Envelope, ErrorDetails, Event, Fields,
    Handler, Provider, ResumeToken, action, extra, reply, socket,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// Copies input to output, prefixed with `message_body` when set.
pub const ECHO: &str = "callwire.demo.ECHO";
/// Pushes a `NEW_MESSAGE` event to every matching callback.
///
/// Takes `message_from` and `message_body`; returns `delivered` (int).
pub const NOTIFY: &str = "callwire.demo.NOTIFY";
/// Field a consumer sets when the user allowed the call.
pub const GRANTED: &str = "granted";

/// Arguments for `callwire serve`.
#[derive(clap::Args)]
pub struct ServeArgs {
    /// Name to publish under.
    #[arg(long, default_value = "demo")]
    pub name: String,

    /// Account this provider answers for.
    #[arg(long, default_value = "me@example.org")]
    pub account: String,
}

/// Demo call semantics.
struct Demo {
    account: String,
    registry: CallbackRegistry,
    /// Callers the user already allowed.
    granted: Mutex<HashSet<CallerId>>,
}

impl Demo {
    /// Asks for permission unless `caller` holds it or the request carries it.
    fn permit(&self, caller: CallerId, envelope: &Envelope) -> Option<Envelope> {
        let mut granted = self.granted.lock().unwrap_or_else(PoisonError::into_inner);
        if granted.contains(&caller) {
            return None;
        }
        if envelope.get_bool(GRANTED) == Some(true) {
            info!(%caller, "permission granted");
            granted.insert(caller);
            return None;
        }
        Some(reply::interaction_required(ResumeToken::new(
            caller.get().to_be_bytes().to_vec(),
        )))
    }

    async fn echo(call: &mut Call) -> Envelope {
        let mut body = call
            .envelope
            .get_str(extra::MESSAGE_BODY)
            .unwrap_or_default()
            .as_bytes()
            .to_vec();
        if let Some(input) = call.input.as_mut() {
            if let Err(e) = input.read_to_end(&mut body).await {
                return reply::error(ErrorDetails::GENERIC_ERROR, format!("reading input: {e}"));
            }
        }
        let written = body.len();
        if let Some(output) = call.output.as_mut() {
            if let Err(e) = output.write_all(&body).await {
                return reply::error(ErrorDetails::GENERIC_ERROR, format!("writing output: {e}"));
            }
        }
        let written = i64::try_from(written).unwrap_or(i64::MAX);
        reply::success(Fields::from([("bytes".to_owned(), written.into())]))
    }

    async fn notify(&self, envelope: &Envelope) -> Envelope {
        let Some(from) = envelope.get_str(extra::MESSAGE_FROM) else {
            return reply::error(
                ErrorDetails::GENERIC_ERROR,
                format!("missing {}", extra::MESSAGE_FROM),
            );
        };
        let message = Envelope::new(action::NEW_MESSAGE)
            .with(extra::ACCOUNT_JID, self.account.as_str())
            .with(extra::MESSAGE_FROM, from)
            .with(extra::MESSAGE_TO, self.account.as_str())
            .with(
                extra::MESSAGE_BODY,
                envelope.get_str(extra::MESSAGE_BODY).unwrap_or_default(),
            );
        let event = Event::from_jid(self.account.as_str(), from, message);
        let accepted = self
            .registry
            .deliver(&event)
            .await
            .iter()
            .filter(|d| d.accepted())
            .count();
        debug!(accepted, "event delivered");
        let accepted = i32::try_from(accepted).unwrap_or(i32::MAX);
        reply::success(Fields::from([("delivered".to_owned(), accepted.into())]))
    }
}

#[async_trait]
impl Handler for Demo {
    async fn execute(&self, call: &mut Call) -> Envelope {
        if let Some(ask) = self.permit(call.caller, &call.envelope) {
            return ask;
        }
        match call.envelope.action() {
            action::CHECK_PERMISSION => reply::success(Fields::new()),
            action::GET_ACCOUNT_JID => reply::success(Fields::from([(
                extra::ACCOUNT_JID.to_owned(),
                self.account.as_str().into(),
            )])),
            ECHO => Self::echo(call).await,
            NOTIFY => self.notify(&call.envelope).await,
            other => reply::error(ErrorDetails::GENERIC_ERROR, format!("unknown action {other}")),
        }
    }

    async fn callback(
        &self,
        caller: CallerId,
        envelope: Envelope,
        handle: Arc<dyn CallCapability>,
    ) -> Envelope {
        match envelope.action() {
            action::REGISTER_PLUGIN_CALLBACK => {
                if let Some(ask) = self.permit(caller, &envelope) {
                    return ask;
                }
                self.registry.handle_register(caller, &envelope, handle)
            }
            action::UNREGISTER_PLUGIN_CALLBACK => {
                self.registry.handle_unregister(caller, &envelope)
            }
            other => reply::error(ErrorDetails::GENERIC_ERROR, format!("unknown action {other}")),
        }
    }

    fn disconnected(&self, caller: CallerId) {
        let dropped = self.registry.drop_owner(caller);
        debug!(%caller, dropped, "registrations dropped");
    }
}

/// Serves the demo provider until Ctrl-C.
pub async fn serve(dir: &Path, args: ServeArgs) -> Result<()> {
    let path = dir.join(format!("{}.sock", args.name));
    let listener = socket::listen(&path)
        .with_context(|| format!("cannot listen on {}", path.display()))?;
    let provider = Arc::new(Provider::new(Demo {
        account: args.account,
        registry: CallbackRegistry::new(),
        granted: Mutex::default(),
    }));
    eprintln!("serving `{}` on {}", args.name, path.display());

    let served = tokio::select! {
        served = socket::serve(listener, provider) => served.context("accept failed"),
        signal = tokio::signal::ctrl_c() => signal.context("signal handler failed"),
    };
    if let Err(e) = std::fs::remove_file(&path) {
        debug!(error = %e, "socket already gone");
    }
    served
}
