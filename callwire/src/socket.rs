//! Unix-socket transport: one connection per pipe or call.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use callwire_proto::{Envelope, ErrorDetails, Hello, HelloAck, extra};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadBuf,
};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::capability::CallCapability;
use crate::connection::{Binding, Connector};
use crate::error::{Error, Result};
use crate::id::{CallerId, RequestId};
use crate::pipe::PipeReader;
use crate::reply;
use crate::service::Provider;

/// Capability over a provider listening on a Unix socket.
#[derive(Debug, Clone)]
pub struct SocketCapability {
    /// Provider socket.
    path: PathBuf,
    /// Process that must be serving `path`, if checked.
    peer: Option<CallerId>,
}

impl SocketCapability {
    /// Creates a capability dialing `path` for each pipe and call.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            peer: None,
        }
    }

    /// Creates a capability that only talks to `path` while `peer` serves it.
    pub fn for_peer(path: impl Into<PathBuf>, peer: CallerId) -> Self {
        Self {
            path: path.into(),
            peer: Some(peer),
        }
    }

    /// Provider socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dials the provider and sends `hello`.
    async fn open(
        &self,
        hello: &Hello,
    ) -> Result<(BufReader<OwnedReadHalf>, BufWriter<OwnedWriteHalf>)> {
        let stream = UnixStream::connect(&self.path).await?;
        if let Some(caller) = self.peer {
            let pid = stream.peer_cred()?.pid();
            if pid.and_then(|pid| u32::try_from(pid).ok()) != Some(caller.get()) {
                warn!(
                    path = %self.path.display(),
                    %caller,
                    ?pid,
                    "callback socket served by another process"
                );
                return Err(Error::ForeignPeer {
                    path: self.path.clone(),
                    caller,
                });
            }
        }
        let (reader, writer) = stream.into_split();
        let mut w = BufWriter::new(writer);
        callwire_proto::send(&mut w, hello).await?;
        Ok((BufReader::new(reader), w))
    }

    /// Tells the provider this process is gone.
    async fn send_release(&self) -> Result<()> {
        let (mut r, mut w) = self.open(&Hello::Release).await?;
        w.flush().await?;
        expect_ready(&mut r).await
    }
}

/// Reads the callee's [`HelloAck`].
async fn expect_ready(r: &mut BufReader<OwnedReadHalf>) -> Result<()> {
    match callwire_proto::recv::<HelloAck>(r).await? {
        HelloAck::Ready => Ok(()),
        HelloAck::Error(msg) => Err(Error::Refused(msg)),
        other => Err(Error::Refused(format!("unexpected ack {other:?}"))),
    }
}

/// Read end of a remote output pipe.
///
/// Keeps the write half open: the callee treats its closure as the caller
/// abandoning the pipe.
struct SocketPipe {
    /// Bytes from the callee.
    reader: BufReader<OwnedReadHalf>,
    /// Held open until the pipe is dropped.
    _writer: BufWriter<OwnedWriteHalf>,
}

impl AsyncRead for SocketPipe {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

#[async_trait]
impl CallCapability for SocketCapability {
    async fn create_output_pipe(&self, request_id: RequestId) -> Result<PipeReader> {
        let (mut r, mut w) = self
            .open(&Hello::OutputPipe {
                request_id: request_id.get(),
            })
            .await?;
        w.flush().await?;
        expect_ready(&mut r).await?;
        Ok(PipeReader::new(SocketPipe {
            reader: r,
            _writer: w,
        }))
    }

    async fn execute(
        &self,
        envelope: Envelope,
        input: Option<PipeReader>,
        request_id: Option<RequestId>,
    ) -> Result<Envelope> {
        let hello = Hello::Execute {
            request_id: request_id.map(RequestId::get),
            has_input: input.is_some(),
        };
        let (mut r, mut w) = self.open(&hello).await?;
        callwire_proto::send_envelope(&mut w, &envelope).await?;
        w.flush().await?;

        let response = async {
            expect_ready(&mut r).await?;
            Ok::<_, Error>(callwire_proto::recv_envelope(&mut r).await?)
        };
        let forward = async move {
            if let Some(mut input) = input {
                tokio::io::copy(&mut input, &mut w).await?;
            }
            w.flush().await?;
            w.shutdown().await
        };
        tokio::pin!(response);
        tokio::select! {
            reply = &mut response => reply,
            forwarded = forward => {
                if let Err(e) = forwarded {
                    debug!(error = %e, "input forwarding stopped");
                }
                (&mut response).await
            }
        }
    }

    async fn callback(
        &self,
        mut envelope: Envelope,
        handle: Arc<dyn CallCapability>,
    ) -> Result<Envelope> {
        let address = handle.address().ok_or(Error::Unaddressable)?;
        envelope.insert(
            extra::CALLBACK_ADDRESS,
            address.to_string_lossy().into_owned(),
        );
        let (mut r, mut w) = self.open(&Hello::Callback).await?;
        callwire_proto::send_envelope(&mut w, &envelope).await?;
        w.flush().await?;
        expect_ready(&mut r).await?;
        Ok(callwire_proto::recv_envelope(&mut r).await?)
    }

    fn address(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn release(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(path = %self.path.display(), "no runtime, release not sent");
            return;
        };
        let capability = self.clone();
        runtime.spawn(async move {
            if let Err(e) = capability.send_release().await {
                debug!(path = %capability.path.display(), error = %e, "release not delivered");
            }
        });
    }
}

/// Providers listening as `{dir}/{name}.sock`.
#[derive(Debug, Clone)]
pub struct SocketConnector {
    /// Socket directory.
    dir: PathBuf,
}

impl SocketConnector {
    /// Creates a connector over `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Socket path of `provider`.
    pub fn socket_path(&self, provider: &str) -> PathBuf {
        self.dir.join(format!("{provider}.sock"))
    }
}

#[async_trait]
impl Connector for SocketConnector {
    async fn bind(&self, provider: &str) -> Result<Binding> {
        let path = self.socket_path(provider);
        match UnixStream::connect(&path).await {
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                return Err(Error::ProviderNotFound(provider.to_owned()));
            }
            Err(e) => return Err(e.into()),
        }
        debug!(%provider, path = %path.display(), "binding socket provider");
        Ok(Binding::permanent(Arc::new(SocketCapability::new(path))))
    }
}

/// Binds a listener at `path`, replacing a stale socket file.
pub fn listen(path: impl AsRef<Path>) -> io::Result<UnixListener> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    UnixListener::bind(path)
}

/// Accepts connections forever, serving each on its own task.
pub async fn serve(listener: UnixListener, provider: Arc<Provider>) -> io::Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let provider = Arc::clone(&provider);
        tokio::spawn(async move {
            if let Err(e) = session(stream, &provider).await {
                warn!(error = %e, "session failed");
            }
        });
    }
}

/// Serves one connection according to its [`Hello`].
async fn session(stream: UnixStream, provider: &Provider) -> io::Result<()> {
    let pid = stream
        .peer_cred()?
        .pid()
        .and_then(|pid| u32::try_from(pid).ok());
    let (reader, writer) = stream.into_split();
    let mut r = BufReader::new(reader);
    let mut w = BufWriter::new(writer);

    let hello: Hello = match callwire_proto::recv(&mut r).await {
        Ok(h) => h,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
        Err(e) => return Err(e),
    };
    let Some(pid) = pid else {
        return refuse(&mut w, "peer process id unavailable").await;
    };
    let caller = CallerId::from(pid);

    match hello {
        Hello::OutputPipe { request_id } => {
            let request_id = RequestId::from(request_id);
            let mut pipe = match provider.create_output_pipe(caller, request_id) {
                Ok(pipe) => pipe,
                Err(e) => return refuse(&mut w, &e.to_string()).await,
            };
            callwire_proto::send(&mut w, &HelloAck::Ready).await?;
            w.flush().await?;

            let hangup = async {
                let mut byte = [0_u8; 1];
                let _ = r.read(&mut byte).await;
            };
            tokio::select! {
                copied = tokio::io::copy(&mut pipe, &mut w) => {
                    let bytes = copied?;
                    debug!(%caller, %request_id, bytes, "output pipe drained");
                    w.flush().await?;
                    w.shutdown().await
                }
                () = hangup => {
                    debug!(%caller, %request_id, "caller abandoned output pipe");
                    let _ = provider.consume_output_pipe(caller, request_id);
                    Ok(())
                }
            }
        }
        Hello::Execute {
            request_id,
            has_input,
        } => {
            let request_id = request_id.map(RequestId::from);
            callwire_proto::send(&mut w, &HelloAck::Ready).await?;
            w.flush().await?;
            let envelope = match callwire_proto::recv_envelope(&mut r).await {
                Ok(envelope) => envelope,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    if let Some(id) = request_id {
                        let _ = provider.consume_output_pipe(caller, id);
                    }
                    let reply = reply::error(ErrorDetails::GENERIC_ERROR, e.to_string());
                    return respond(&mut w, &reply).await;
                }
                Err(e) => return Err(e),
            };
            let input = has_input.then(|| PipeReader::new(r));
            let reply = provider.execute(caller, envelope, input, request_id).await;
            respond(&mut w, &reply).await
        }
        Hello::Callback => {
            callwire_proto::send(&mut w, &HelloAck::Ready).await?;
            w.flush().await?;
            let envelope = match callwire_proto::recv_envelope(&mut r).await {
                Ok(envelope) => envelope,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    let reply = reply::error(ErrorDetails::GENERIC_ERROR, e.to_string());
                    return respond(&mut w, &reply).await;
                }
                Err(e) => return Err(e),
            };
            let Some(address) = envelope.get_str(extra::CALLBACK_ADDRESS).map(PathBuf::from) else {
                let reply = reply::error(
                    ErrorDetails::INVALID_REGISTRATION,
                    format!("missing {}", extra::CALLBACK_ADDRESS),
                );
                return respond(&mut w, &reply).await;
            };
            let handle = Arc::new(SocketCapability::for_peer(address, caller));
            let reply = provider.callback(caller, envelope, handle).await;
            respond(&mut w, &reply).await
        }
        Hello::Release => {
            provider.disconnect(caller);
            callwire_proto::send(&mut w, &HelloAck::Ready).await?;
            w.flush().await
        }
        other => refuse(&mut w, &format!("unsupported request {other:?}")).await,
    }
}

/// Refuses the connection's request.
async fn refuse<W: AsyncWrite + Unpin>(w: &mut W, reason: &str) -> io::Result<()> {
    callwire_proto::send(w, &HelloAck::Error(reason.to_owned())).await?;
    w.flush().await
}

/// Sends the result envelope and closes the write side.
async fn respond<W: AsyncWrite + Unpin>(w: &mut W, reply: &Envelope) -> io::Result<()> {
    callwire_proto::send_envelope(w, reply).await?;
    w.flush().await?;
    w.shutdown().await
}

#[cfg(test)]
mod tests {
    use callwire_proto::Fields;

    use super::*;
    use crate::error::{CallError, ErrorKind};
    use crate::executor::Executor;
    use crate::service::{Call, Handler};

    /// Writes input followed by `-reply`.
    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn execute(&self, call: &mut Call) -> Envelope {
            let mut body = call
                .envelope
                .get_str(extra::MESSAGE_BODY)
                .unwrap_or_default()
                .as_bytes()
                .to_vec();
            if let Some(input) = call.input.as_mut() {
                let _ = input.read_to_end(&mut body).await;
            }
            body.extend_from_slice(b"-reply");
            if let Some(output) = call.output.as_mut() {
                let _ = output.write_all(&body).await;
            }
            reply::success(Fields::new())
        }
    }

    async fn start(dir: &Path) -> SocketConnector {
        let connector = SocketConnector::new(dir);
        let listener = listen(connector.socket_path("echo")).unwrap();
        tokio::spawn(serve(listener, Arc::new(Provider::new(Echo))));
        connector
    }

    #[tokio::test]
    async fn echo_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let connector = start(dir.path()).await;
        let binding = connector.bind("echo").await.unwrap();
        let executor = Executor::new(binding.capability);

        let mut input: &[u8] = b" and more";
        let mut out = Vec::new();
        let outcome = executor
            .invoke(
                Envelope::new("test.ECHO").with(extra::MESSAGE_BODY, "hi"),
                Some(&mut input),
                Some(&mut out),
            )
            .await;

        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(out, b"hi and more-reply");
    }

    #[tokio::test]
    async fn missing_socket_is_provider_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SocketConnector::new(dir.path());
        assert!(matches!(
            connector.bind("nobody").await,
            Err(Error::ProviderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn vanished_provider_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Executor::new(Arc::new(SocketCapability::new(dir.path().join("gone.sock"))));
        let outcome = executor.invoke(Envelope::new("test.ECHO"), None, None).await;
        assert_eq!(outcome.error().map(CallError::kind), Some(ErrorKind::Transport));
    }

    #[tokio::test]
    async fn callback_socket_of_another_process_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = start(dir.path()).await.socket_path("echo");

        let stranger = CallerId::from(std::process::id().wrapping_add(1));
        let executor = Executor::new(Arc::new(SocketCapability::for_peer(&path, stranger)));
        let outcome = executor.invoke(Envelope::new("test.ECHO"), None, None).await;
        assert_eq!(outcome.error().map(CallError::kind), Some(ErrorKind::Transport));

        let owner = SocketCapability::for_peer(path, CallerId::current());
        let executor = Executor::new(Arc::new(owner));
        let outcome = executor.invoke(Envelope::new("test.ECHO"), None, None).await;
        assert!(outcome.is_success(), "{outcome:?}");
    }

    #[tokio::test]
    async fn release_forgets_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.sock");
        let provider = Arc::new(Provider::new(Echo));
        tokio::spawn(serve(listen(&path).unwrap(), Arc::clone(&provider)));
        let _out = provider
            .create_output_pipe(CallerId::current(), RequestId::from(7))
            .unwrap();

        SocketCapability::new(&path).release();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !provider.pipes().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn callback_without_address_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let connector = start(dir.path()).await;
        let capability = SocketCapability::new(connector.socket_path("echo"));
        let handle: Arc<dyn CallCapability> = Arc::new(crate::local::LocalCapability::new(
            &Arc::new(Provider::new(Echo)),
            CallerId::from(1),
        ));
        assert!(matches!(
            capability.callback(Envelope::new("test.REG"), handle).await,
            Err(Error::Unaddressable)
        ));
    }
}
