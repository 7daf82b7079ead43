//! Consumer commands: call, versions, listen.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use callwire::{
    Broker, Call, CallCapability, CallOutcome, Connection, Envelope, Executor, Fields, Handler,
    InputSource, Interaction, InteractionHandler, Provider, ResumeToken, SocketCapability,
    SocketConnector, action, extra, reply, socket,
};
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tracing::debug;

use crate::fields;
use crate::provider::GRANTED;

/// Arguments for `callwire call`.
#[derive(clap::Args)]
pub struct CallArgs {
    /// Provider name.
    pub provider: String,

    /// Action identifier.
    pub action: String,

    /// Request fields.
    #[arg(value_name = "FIELD")]
    pub fields: Vec<String>,

    /// Send this file as call input.
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,

    /// Write call output here instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Fail instead of prompting when the provider asks for permission.
    #[arg(long)]
    pub no_prompt: bool,
}

/// Arguments for `callwire listen`.
#[derive(clap::Args)]
pub struct ListenArgs {
    /// Provider name.
    pub provider: String,

    /// Account whose events to receive.
    #[arg(long)]
    pub account: String,

    /// Only events from this peer domain.
    #[arg(long)]
    pub domain: Option<String>,

    /// Only events from this local part (requires --domain).
    #[arg(long, requires = "domain")]
    pub local_part: Option<String>,
}

/// Asks on the terminal whether to allow the paused call.
struct Prompt {
    enabled: bool,
}

#[async_trait]
impl InteractionHandler for Prompt {
    async fn interact(&self, _token: &ResumeToken, request: &Envelope) -> Interaction {
        if !self.enabled {
            return Interaction::Cancelled;
        }
        eprint!("provider asks permission for {}; allow? [y/N] ", request.action());
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut line).await {
            Ok(_) if line.trim().eq_ignore_ascii_case("y") => {
                Interaction::Resumed(Fields::from([(GRANTED.to_owned(), true.into())]))
            }
            _ => Interaction::Cancelled,
        }
    }
}

/// Binds `provider` under `dir`.
async fn bind(dir: &Path, provider: &str) -> Result<(Connection, Executor)> {
    let connection = Connection::new(Arc::new(SocketConnector::new(dir)), provider);
    let executor = connection
        .bind()
        .await
        .with_context(|| format!("cannot reach provider `{provider}`"))?;
    Ok((connection, executor))
}

/// Turns an outcome into its fields or an error.
fn settle(outcome: CallOutcome) -> Result<Fields> {
    match outcome {
        CallOutcome::Success(fields) => Ok(fields),
        CallOutcome::Error(e) => Err(e.into()),
        CallOutcome::InteractionRequired(_) => bail!("provider still requires interaction"),
        other => Err(anyhow!("unexpected outcome {other:?}")),
    }
}

pub async fn call(dir: &Path, args: CallArgs) -> Result<()> {
    let mut envelope = Envelope::new(args.action);
    for field in &args.fields {
        let (key, value) = fields::parse(field)?;
        envelope.insert(key, value);
    }

    let (_connection, executor) = bind(dir, &args.provider).await?;
    let broker = Broker::new(
        executor,
        Prompt {
            enabled: !args.no_prompt,
        },
    );

    let mut input = args.input;
    let input = input.as_mut().map(|path| path as &mut dyn InputSource);
    let outcome = match &args.output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?;
            broker.run(envelope, input, Some(&mut file)).await
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let outcome = broker
                .run(envelope, input, Some(&mut stdout as &mut (dyn AsyncWrite + Send + Unpin)))
                .await;
            println!();
            outcome
        }
    };

    let fields = settle(outcome)?;
    println!("{}", serde_json::to_string_pretty(&fields::to_json(&fields))?);
    Ok(())
}

pub async fn versions(dir: &Path, provider: &str) -> Result<()> {
    let (_connection, executor) = bind(dir, provider).await?;
    let outcome = executor
        .invoke(Envelope::new(action::GET_SUPPORTED_VERSIONS), None, None)
        .await;
    let fields = settle(outcome)?;
    let versions = fields
        .get(extra::SUPPORTED_VERSIONS)
        .and_then(|v| v.as_int_array())
        .context("provider did not list its versions")?;
    println!("{versions:?}");
    Ok(())
}

/// Prints events pushed by the provider.
struct Printer;

#[async_trait]
impl Handler for Printer {
    async fn execute(&self, call: &mut Call) -> Envelope {
        let line = fields::envelope_to_json(&call.envelope);
        println!("{line}");
        reply::success(Fields::new())
    }
}

pub async fn listen(dir: &Path, args: ListenArgs) -> Result<()> {
    let (_connection, executor) = bind(dir, &args.provider).await?;

    let path = dir.join(format!("listen-{}.sock", std::process::id()));
    let listener = socket::listen(&path)
        .with_context(|| format!("cannot listen on {}", path.display()))?;
    let server = tokio::spawn(socket::serve(listener, Arc::new(Provider::new(Printer))));
    let handle: Arc<dyn CallCapability> = Arc::new(SocketCapability::new(&path));

    let mut request =
        Envelope::new(action::REGISTER_PLUGIN_CALLBACK).with(extra::ACCOUNT_JID, args.account);
    if let Some(domain) = args.domain {
        request.insert(extra::JID_DOMAIN, domain);
    }
    if let Some(local_part) = args.local_part {
        request.insert(extra::JID_LOCAL_PART, local_part);
    }
    let broker = Broker::new(executor, Prompt { enabled: true });
    let outcome = broker.run_callback(request, Arc::clone(&handle)).await;
    let registered = settle(outcome).and_then(|fields| {
        fields
            .get(extra::REGISTRATION_ID)
            .and_then(|v| v.as_long())
            .context("provider returned no registration id")
    });

    let result = match registered {
        Ok(id) => {
            eprintln!("registered as {id}; waiting for events");
            tokio::signal::ctrl_c().await.context("signal handler failed")?;
            let request = Envelope::new(action::UNREGISTER_PLUGIN_CALLBACK)
                .with(extra::REGISTRATION_ID, id);
            settle(broker.executor().callback(request, handle).await).map(drop)
        }
        Err(e) => Err(e),
    };

    server.abort();
    if let Err(e) = std::fs::remove_file(&path) {
        debug!(error = %e, "callback socket already gone");
    }
    result
}
