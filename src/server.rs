//! TCP and WebSocket accept loops and per-connection event handling.
//!
//! Connections are independent tokio tasks. Within a connection, `landmark`
//! events are answered one at a time and in order; the forward pass runs on
//! the blocking pool so the reactor keeps serving other connections. Both
//! transports carry the same `{"event", "data"}` envelopes: one per line on
//! raw TCP, one per text message on WebSocket.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{future, Sink, SinkExt as _, Stream, StreamExt as _, TryStreamExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::inference::ServiceContext;
use crate::log;
use crate::logging::LogFile;
use crate::protocol::{
    self, decode_client_event, ClientEvent, LandmarkRequest, PredictionResult, ServerEvent,
};

/// Pause after an accept error that is not tied to a single connection
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Framing used on an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Newline-delimited JSON over raw TCP
    Lines,
    /// One JSON envelope per WebSocket text message
    WebSocket,
}

impl Transport {
    fn name(self) -> &'static str {
        match self {
            Transport::Lines => "tcp",
            Transport::WebSocket => "ws",
        }
    }
}

/// Source of incoming connections
trait Incoming {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Incoming for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Bind the listening socket.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let bind_addr: SocketAddr = tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("invalid listen address {}", addr))?
        .next()
        .with_context(|| format!("{} did not resolve", addr))?;
    TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))
}

/// Accept newline-delimited JSON clients forever.
pub async fn serve(listener: TcpListener, ctx: Arc<ServiceContext>, logfile: LogFile, verbose: bool) {
    accept_loop(listener, Transport::Lines, ctx, logfile, verbose).await
}

/// Accept WebSocket clients (browsers) forever.
pub async fn serve_websocket(listener: TcpListener, ctx: Arc<ServiceContext>, logfile: LogFile, verbose: bool) {
    accept_loop(listener, Transport::WebSocket, ctx, logfile, verbose).await
}

/// How long to wait before the next accept. Errors that belong to one
/// aborted connection retry at once; anything else (fd exhaustion and the
/// like) backs off.
fn accept_retry_delay(err: &io::Error) -> Duration {
    match err.kind() {
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted => {
            Duration::ZERO
        }
        _ => ACCEPT_BACKOFF,
    }
}

async fn accept_loop<L: Incoming + Send>(
    mut listener: L,
    transport: Transport,
    ctx: Arc<ServiceContext>,
    logfile: LogFile,
    verbose: bool,
) {
    loop {
        let (tcp_stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                log!(logfile, "accept failed: {}", e);
                let delay = accept_retry_delay(&e);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }
        };
        if let Err(e) = tcp_stream.set_nodelay(true) {
            log!(logfile, "Client {}: set_nodelay failed: {}", addr, e);
        }
        log!(logfile, "Client connected: {} ({})", addr, transport.name());

        let ctx = Arc::clone(&ctx);
        let logfile = Arc::clone(&logfile);
        tokio::spawn(async move {
            let result = match transport {
                Transport::Lines => handle_connection(tcp_stream, addr, ctx, &logfile, verbose).await,
                Transport::WebSocket => handle_websocket(tcp_stream, addr, ctx, &logfile, verbose).await,
            };
            if let Err(e) = result {
                log!(logfile, "Client {}: {:#}", addr, e);
            }
            log!(logfile, "Client disconnected: {}", addr);
        });
    }
}

/// Serve one newline-delimited JSON connection until the client goes away.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServiceContext>,
    logfile: &LogFile,
    verbose: bool,
) -> Result<()> {
    let (sink, lines) = protocol::message_stream(stream).split::<String>();
    handle_events(lines, sink, addr, &ctx, logfile, verbose).await
}

/// Complete the WebSocket handshake, then serve text messages as events.
pub async fn handle_websocket(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServiceContext>,
    logfile: &LogFile,
    verbose: bool,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (sink, messages) = ws.split::<Message>();
    let sink = sink.with(|line: String| future::ready(Ok::<_, WsError>(Message::text(line))));
    let lines = messages.try_filter_map(|msg| future::ready(Ok(text_payload(msg))));
    handle_events(lines, sink, addr, &ctx, logfile, verbose).await
}

/// Text frames carry events; binary, ping/pong and close frames do not.
fn text_payload(msg: Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text.as_str().to_owned()),
        _ => None,
    }
}

/// Read events until the stream ends. Only transport failures end the
/// connection early; bad requests are answered with an error prediction.
async fn handle_events<St, Si, E>(
    mut lines: St,
    mut sink: Si,
    addr: SocketAddr,
    ctx: &Arc<ServiceContext>,
    logfile: &LogFile,
    verbose: bool,
) -> Result<()>
where
    St: Stream<Item = Result<String, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    Si: Sink<String> + Unpin,
    Si::Error: std::error::Error + Send + Sync + 'static,
{
    while let Some(line) = lines.next().await {
        let line = line.context("read failed")?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = match decode_client_event(&line) {
            Ok(ClientEvent::Landmark(request)) => predict_blocking(ctx, request).await,
            Ok(ClientEvent::MalformedLandmark(reason)) => {
                PredictionResult::error(format!("Invalid landmark payload: {}", reason))
            }
            Ok(ClientEvent::Unknown(event)) => {
                if verbose {
                    log!(logfile, "[verbose] {}: ignoring event '{}'", addr, event);
                }
                continue;
            }
            Err(e) => PredictionResult::error(format!("Invalid message: {}", e)),
        };

        match &reply {
            PredictionResult::Error { error, .. } => log!(logfile, "{}: prediction error: {}", addr, error),
            PredictionResult::Label { label, score } if verbose => {
                log!(logfile, "[verbose] {}: {} ({:.3})", addr, label, score)
            }
            _ => {}
        }

        protocol::send_message(&mut sink, &ServerEvent::Prediction(reply)).await?;
    }

    Ok(())
}

async fn predict_blocking(ctx: &Arc<ServiceContext>, request: LandmarkRequest) -> PredictionResult {
    let ctx = Arc::clone(ctx);
    match tokio::task::spawn_blocking(move || ctx.predict(&request)).await {
        Ok(result) => result,
        Err(e) => PredictionResult::error(format!("inference task failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_map::ReverseClassMap;
    use crate::landmarks::VECTOR_LEN;
    use crate::logging;
    use crate::model::LogitModel;
    use crate::protocol::Envelope;

    struct AlwaysFirst;

    impl LogitModel for AlwaysFirst {
        fn name(&self) -> String {
            "always-first".to_string()
        }
        fn input_width(&self) -> usize {
            VECTOR_LEN
        }
        fn output_width(&self) -> Option<usize> {
            Some(2)
        }
        fn forward(&self, _input: &[f32]) -> anyhow::Result<Vec<f32>> {
            Ok(vec![2.0, 0.0])
        }
    }

    /// Fails the queued accepts before handing out real connections
    struct FlakyListener {
        failures: Vec<io::Error>,
        inner: TcpListener,
    }

    impl Incoming for FlakyListener {
        fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
            async move {
                if let Some(e) = self.failures.pop() {
                    return Err(e);
                }
                self.inner.accept().await
            }
        }
    }

    fn context() -> Arc<ServiceContext> {
        let classes = ReverseClassMap::from_pairs([("Hello".to_string(), 0), ("Bye".to_string(), 1)]).unwrap();
        Arc::new(ServiceContext::new(Box::new(AlwaysFirst), classes).unwrap())
    }

    #[test]
    fn test_accept_retry_delay() {
        assert_eq!(accept_retry_delay(&io::Error::from(io::ErrorKind::ConnectionAborted)), Duration::ZERO);
        assert_eq!(accept_retry_delay(&io::Error::from(io::ErrorKind::Interrupted)), Duration::ZERO);
        assert_eq!(accept_retry_delay(&io::Error::other("too many open files")), ACCEPT_BACKOFF);
    }

    #[test]
    fn test_text_payload_skips_control_frames() {
        assert_eq!(text_payload(Message::text("{}")), Some("{}".to_string()));
        assert_eq!(text_payload(Message::Ping(Vec::new().into())), None);
        assert_eq!(text_payload(Message::Binary(vec![1, 2].into())), None);
    }

    #[tokio::test]
    async fn test_accept_errors_do_not_stop_serving() {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = inner.local_addr().unwrap();
        let listener = FlakyListener {
            failures: vec![
                io::Error::other("too many open files"),
                io::Error::from(io::ErrorKind::ConnectionAborted),
            ],
            inner,
        };
        tokio::spawn(accept_loop(listener, Transport::Lines, context(), logging::stderr_only(), false));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = protocol::message_stream(stream);
        let request = LandmarkRequest {
            vector: Some(vec![0.0; VECTOR_LEN]),
            normalized: true,
        };
        protocol::send_message(&mut framed, &Envelope::landmark(&request).unwrap()).await.unwrap();
        let ServerEvent::Prediction(result) = protocol::recv_message::<ServerEvent>(&mut framed).await.unwrap();
        match result {
            PredictionResult::Label { label, .. } => assert_eq!(label, "Hello"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
