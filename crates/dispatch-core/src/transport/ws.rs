//! WebSocket channels over blocking `tungstenite`.
//!
//! Each handle owns one reader thread. The thread opens the TCP stream with
//! a connect timeout and sets the socket's read timeout to the poll interval
//! before the upgrade handshake, so neither the handshake nor a silent
//! server can hold the thread past the connect deadline or a close request.
//! `wss://` URLs are upgraded over rustls with the webpki root store.

use std::borrow::Cow;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{HandshakeError, Message, WebSocket};

use super::{
    ABNORMAL_CLOSE, ChannelEvent, ChannelHandle, ChannelId, ChannelSink, INTENTIONAL_CLOSE,
    NO_STATUS_CLOSE, Transport,
};
use crate::error::ErrorCode;

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

const DEFAULT_POLL: Duration = Duration::from_millis(250);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_DRAIN: Duration = Duration::from_secs(1);

/// Why a channel could not be established.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("invalid websocket url: {0}")]
    Url(String),

    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("tcp connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] Box<tungstenite::Error>),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not start websocket reader: {0}")]
    Spawn(#[source] io::Error),
}

impl WsError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Spawn(_) => ErrorCode::InternalUnexpected,
            Self::Url(_) => ErrorCode::InvalidEndpoint,
            Self::Resolve { .. } | Self::Connect { .. } | Self::Handshake(_) | Self::Timeout(_) => {
                ErrorCode::BackendUnreachable
            }
        }
    }
}

/// Opens WebSocket channels.
#[derive(Debug, Clone)]
pub struct WsTransport {
    poll_interval: Duration,
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WsTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a read may block before the reader re-checks for close requests.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Upper bound on TCP connect plus the upgrade handshake.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Transport for WsTransport {
    type Handle = WsHandle;

    fn open(&mut self, url: &str, sink: ChannelSink) -> WsHandle {
        let id = sink.channel();
        let (close_tx, close_rx) = mpsc::channel();
        let url = url.to_string();
        let timing = Timing {
            poll: self.poll_interval,
            connect_timeout: self.connect_timeout,
        };

        let sink = Arc::new(sink);
        let reader_sink = Arc::clone(&sink);
        let spawned = thread::Builder::new()
            .name(format!("dispatch-ws-{}", id.get()))
            .spawn(move || read_loop(&url, &reader_sink, &close_rx, timing));

        if let Err(err) = spawned {
            report_failure(&sink, &WsError::Spawn(err), "reader not started");
        }

        WsHandle { id, close_tx }
    }
}

/// Owner side of a WebSocket channel. Dropping it closes the channel.
#[derive(Debug)]
pub struct WsHandle {
    id: ChannelId,
    close_tx: Sender<(u16, String)>,
}

impl ChannelHandle for WsHandle {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.close_tx.send((code, reason.to_string())).is_err() {
            debug!(channel = %self.id, "close requested on finished channel");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    poll: Duration,
    connect_timeout: Duration,
}

enum Connect {
    Open(Box<Socket>),
    Cancelled(u16, String),
    Failed(WsError),
}

/// Emit the terminal pair for a channel that never opened.
fn report_failure(sink: &ChannelSink, err: &WsError, reason: &str) {
    warn!(channel = %sink.channel(), code = %err.code(), error = %err, "websocket channel failed");
    sink.emit(ChannelEvent::Failed(err.to_string()));
    sink.emit(ChannelEvent::Closed {
        code: ABNORMAL_CLOSE,
        reason: reason.to_string(),
    });
}

fn read_loop(url: &str, sink: &ChannelSink, close_rx: &Receiver<(u16, String)>, timing: Timing) {
    let id = sink.channel();
    debug!(channel = %id, url, "connecting");

    let mut socket = match connect(url, close_rx, timing) {
        Connect::Open(socket) => socket,
        Connect::Cancelled(code, reason) => {
            debug!(channel = %id, code, "close requested while connecting");
            sink.emit(ChannelEvent::Closed { code, reason });
            return;
        }
        Connect::Failed(err) => {
            report_failure(sink, &err, "connection failed");
            return;
        }
    };

    info!(channel = %id, url, "websocket open");
    sink.emit(ChannelEvent::Opened);

    loop {
        if let Some((code, reason)) = close_requested(close_rx) {
            close_socket(&mut socket, code, &reason);
            sink.emit(ChannelEvent::Closed { code, reason });
            return;
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                sink.emit(ChannelEvent::Message(text));
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    sink.emit(ChannelEvent::Message(text));
                }
                Err(_) => debug!(channel = %id, "non-UTF-8 binary frame skipped"),
            },
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame.map_or_else(
                    || (NO_STATUS_CLOSE, String::new()),
                    |f| (u16::from(f.code), f.reason.into_owned()),
                );
                drain(&mut socket);
                sink.emit(ChannelEvent::Closed { code, reason });
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(err)) if is_timeout(&err) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                sink.emit(ChannelEvent::Closed {
                    code: ABNORMAL_CLOSE,
                    reason: "connection closed".to_string(),
                });
                return;
            }
            Err(err) => {
                sink.emit(ChannelEvent::Failed(err.to_string()));
                sink.emit(ChannelEvent::Closed {
                    code: ABNORMAL_CLOSE,
                    reason: "connection lost".to_string(),
                });
                return;
            }
        }
    }
}

/// TCP connect and upgrade handshake, bounded by `timing.connect_timeout`.
///
/// The stream carries the poll interval as its read timeout from the start,
/// so an unanswered handshake comes back as `Interrupted` on every poll and
/// the deadline and close requests are checked in between.
fn connect(url: &str, close_rx: &Receiver<(u16, String)>, timing: Timing) -> Connect {
    let deadline = Instant::now() + timing.connect_timeout;

    let request = match url.into_client_request() {
        Ok(request) => request,
        Err(err) => return Connect::Failed(WsError::Url(err.to_string())),
    };
    let stream = match open_stream(&request, deadline, timing) {
        Ok(stream) => stream,
        Err(err) => return Connect::Failed(err),
    };

    let mut attempt = tungstenite::client_tls_with_config(request, stream, None, None);
    loop {
        match attempt {
            Ok((socket, _response)) => return Connect::Open(Box::new(socket)),
            Err(HandshakeError::Failure(tungstenite::Error::Io(err))) if is_timeout(&err) => {
                return Connect::Failed(WsError::Timeout(timing.connect_timeout));
            }
            Err(HandshakeError::Failure(err)) => return Connect::Failed(WsError::Handshake(Box::new(err))),
            Err(HandshakeError::Interrupted(mid)) => {
                if let Some((code, reason)) = close_requested(close_rx) {
                    return Connect::Cancelled(code, reason);
                }
                if Instant::now() >= deadline {
                    return Connect::Failed(WsError::Timeout(timing.connect_timeout));
                }
                attempt = mid.handshake();
            }
        }
    }
}

fn open_stream(request: &Request, deadline: Instant, timing: Timing) -> Result<TcpStream, WsError> {
    let uri = request.uri();
    let host = uri
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .ok_or_else(|| WsError::Url("missing host".to_string()))?;
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("wss") { 443 } else { 80 });

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| WsError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(WsError::Timeout(timing.connect_timeout));
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => {
                configure_stream(&stream, timing).map_err(|source| WsError::Connect {
                    addr: addr.to_string(),
                    source,
                })?;
                return Ok(stream);
            }
            Err(source) if is_timeout(&source) => {
                return Err(WsError::Timeout(timing.connect_timeout));
            }
            Err(source) => {
                last_err = Some(WsError::Connect {
                    addr: addr.to_string(),
                    source,
                });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| WsError::Resolve {
        host: host.to_string(),
        source: io::Error::new(ErrorKind::NotFound, "no addresses"),
    }))
}

fn configure_stream(stream: &TcpStream, timing: Timing) -> io::Result<()> {
    stream.set_read_timeout(Some(timing.poll))?;
    stream.set_write_timeout(Some(timing.connect_timeout))?;
    stream.set_nodelay(true)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// A pending close request. A dropped handle counts as an intentional close.
fn close_requested(close_rx: &Receiver<(u16, String)>) -> Option<(u16, String)> {
    match close_rx.try_recv() {
        Ok(request) => Some(request),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => {
            Some((INTENTIONAL_CLOSE, "handle dropped".to_string()))
        }
    }
}

fn close_socket(socket: &mut Socket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: Cow::Owned(reason.to_string()),
    };
    if let Err(err) = socket.close(Some(frame)) {
        debug!(error = %err, "close frame not sent");
        return;
    }
    drain(socket);
}

/// Read until the close handshake completes or the drain window passes.
fn drain(socket: &mut Socket) {
    let deadline = Instant::now() + CLOSE_DRAIN;
    while Instant::now() < deadline {
        match socket.read() {
            Ok(_) => {}
            Err(tungstenite::Error::Io(err)) if is_timeout(&err) => {}
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(5);

    fn collecting_sink(id: u64) -> (ChannelSink, Receiver<ChannelEvent>) {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(ChannelId::new(id), move |_, event| tx.send(event).is_ok());
        (sink, rx)
    }

    fn fast_transport() -> WsTransport {
        WsTransport::new()
            .with_poll_interval(Duration::from_millis(20))
            .with_connect_timeout(Duration::from_secs(2))
    }

    /// Accept one websocket client on loopback and hand it to `script`.
    fn serve_once(
        script: impl FnOnce(&mut WebSocket<TcpStream>) + Send + 'static,
    ) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut ws = tungstenite::accept(stream).expect("server handshake");
            script(&mut ws);
        });
        (format!("ws://127.0.0.1:{port}/ws"), server)
    }

    /// Keep reading until the peer finishes the close handshake.
    fn read_until_closed(ws: &mut WebSocket<TcpStream>) -> Option<(u16, String)> {
        let mut seen = None;
        loop {
            match ws.read() {
                Ok(Message::Close(Some(frame))) => {
                    seen = Some((u16::from(frame.code), frame.reason.into_owned()));
                }
                Ok(_) => {}
                Err(_) => return seen,
            }
        }
    }

    fn collect_until_closed(rx: &Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        loop {
            let event = rx.recv_timeout(WAIT).expect("channel event");
            let done = matches!(event, ChannelEvent::Closed { .. });
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[test]
    fn refused_connection_reports_failed_then_closed() {
        // Bind then drop to get a loopback port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .map(|a| a.port())
            .expect("ephemeral port");

        let (sink, rx) = collecting_sink(1);
        let handle = fast_transport().open(&format!("ws://127.0.0.1:{port}/ws"), sink);
        assert_eq!(handle.id(), ChannelId::new(1));

        let first = rx.recv_timeout(WAIT).expect("failure event");
        assert!(matches!(first, ChannelEvent::Failed(_)), "{first:?}");
        let second = rx.recv_timeout(WAIT).expect("close event");
        assert_eq!(
            second,
            ChannelEvent::Closed {
                code: ABNORMAL_CLOSE,
                reason: "connection failed".into()
            }
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn silent_peer_times_out_with_failed_then_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let (_stream, _) = listener.accept().expect("accept");
            let _ = release_rx.recv();
        });

        let (sink, rx) = collecting_sink(2);
        let mut transport = fast_transport().with_connect_timeout(Duration::from_millis(300));
        let _handle = transport.open(&format!("ws://127.0.0.1:{port}/ws"), sink);

        let first = rx.recv_timeout(WAIT).expect("failure event");
        match first {
            ChannelEvent::Failed(message) => assert!(message.contains("timed out"), "{message}"),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(
            rx.recv_timeout(WAIT).expect("close event"),
            ChannelEvent::Closed {
                code: ABNORMAL_CLOSE,
                reason: "connection failed".into()
            }
        );

        release_tx.send(()).expect("release server");
        server.join().expect("server thread");
    }

    #[test]
    fn close_during_handshake_ends_without_opening() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let (_stream, _) = listener.accept().expect("accept");
            let _ = release_rx.recv();
        });

        let (sink, rx) = collecting_sink(3);
        let mut transport = fast_transport().with_connect_timeout(Duration::from_secs(30));
        let handle = transport.open(&format!("ws://127.0.0.1:{port}/ws"), sink);
        drop(handle);

        assert_eq!(
            collect_until_closed(&rx),
            vec![ChannelEvent::Closed {
                code: INTENTIONAL_CLOSE,
                reason: "handle dropped".into()
            }]
        );

        release_tx.send(()).expect("release server");
        server.join().expect("server thread");
    }

    #[test]
    fn messages_then_server_close_frame() {
        let (url, server) = serve_once(|ws| {
            ws.send(Message::Text("hello".into())).expect("send text");
            ws.send(Message::Binary(br#"{"a":1}"#.to_vec())).expect("send binary");
            ws.send(Message::Binary(vec![0xff, 0xfe])).expect("send invalid utf8");
            ws.close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))
            .expect("send close");
            read_until_closed(ws);
        });

        let (sink, rx) = collecting_sink(4);
        let _handle = fast_transport().open(&url, sink);

        assert_eq!(
            collect_until_closed(&rx),
            vec![
                ChannelEvent::Opened,
                ChannelEvent::Message("hello".into()),
                ChannelEvent::Message(r#"{"a":1}"#.into()),
                ChannelEvent::Closed {
                    code: INTENTIONAL_CLOSE,
                    reason: "bye".into()
                },
            ]
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        server.join().expect("server thread");
    }

    #[test]
    fn close_without_status_reports_1005() {
        let (url, server) = serve_once(|ws| {
            ws.close(None).expect("send close");
            read_until_closed(ws);
        });

        let (sink, rx) = collecting_sink(5);
        let _handle = fast_transport().open(&url, sink);

        assert_eq!(
            collect_until_closed(&rx),
            vec![
                ChannelEvent::Opened,
                ChannelEvent::Closed {
                    code: NO_STATUS_CLOSE,
                    reason: String::new()
                },
            ]
        );
        server.join().expect("server thread");
    }

    #[test]
    fn owner_close_sends_frame_and_reports_one_closed() {
        let (seen_tx, seen_rx) = mpsc::channel();
        let (url, server) = serve_once(move |ws| {
            ws.send(Message::Text("first".into())).expect("send text");
            let seen = read_until_closed(ws);
            seen_tx.send(seen).expect("report close");
        });

        let (sink, rx) = collecting_sink(6);
        let mut handle = fast_transport().open(&url, sink);
        assert_eq!(rx.recv_timeout(WAIT).expect("opened"), ChannelEvent::Opened);
        assert_eq!(
            rx.recv_timeout(WAIT).expect("message"),
            ChannelEvent::Message("first".into())
        );

        handle.close(INTENTIONAL_CLOSE, "done");
        assert_eq!(
            collect_until_closed(&rx),
            vec![ChannelEvent::Closed {
                code: INTENTIONAL_CLOSE,
                reason: "done".into()
            }]
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        assert_eq!(
            seen_rx.recv_timeout(WAIT).expect("server saw close"),
            Some((INTENTIONAL_CLOSE, "done".to_string()))
        );
        server.join().expect("server thread");
    }

    #[test]
    fn wss_url_starts_a_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream.set_read_timeout(Some(WAIT)).expect("timeout");
            let mut first = [0u8; 1];
            stream.read_exact(&mut first).expect("client hello");
            first[0]
        });

        let (sink, rx) = collecting_sink(7);
        let mut transport = fast_transport().with_connect_timeout(Duration::from_millis(500));
        let _handle = transport.open(&format!("wss://127.0.0.1:{port}/ws"), sink);

        // 0x16 is a TLS handshake record; a plaintext upgrade would start with `G`.
        assert_eq!(server.join().expect("server thread"), 0x16);
        let events = collect_until_closed(&rx);
        assert!(matches!(events.first(), Some(ChannelEvent::Failed(_))), "{events:?}");
    }

    #[test]
    fn spawn_failure_still_ends_with_closed() {
        let (sink, rx) = collecting_sink(8);
        let err = WsError::Spawn(io::Error::new(ErrorKind::OutOfMemory, "no threads"));
        report_failure(&sink, &err, "reader not started");

        let first = rx.recv_timeout(WAIT).expect("failure event");
        assert!(matches!(first, ChannelEvent::Failed(ref m) if m.contains("no threads")), "{first:?}");
        assert_eq!(
            rx.recv_timeout(WAIT).expect("close event"),
            ChannelEvent::Closed {
                code: ABNORMAL_CLOSE,
                reason: "reader not started".into()
            }
        );
    }

    #[test]
    fn error_codes_separate_internal_from_unreachable() {
        let spawn = WsError::Spawn(io::Error::other("boom"));
        assert_eq!(spawn.code(), ErrorCode::InternalUnexpected);
        assert_eq!(
            WsError::Timeout(Duration::from_secs(1)).code(),
            ErrorCode::BackendUnreachable
        );
        assert_eq!(WsError::Url("nope".into()).code(), ErrorCode::InvalidEndpoint);
    }

    #[test]
    fn dropped_handle_is_intentional_close() {
        let (tx, rx) = mpsc::channel::<(u16, String)>();
        drop(tx);
        assert_eq!(
            close_requested(&rx),
            Some((INTENTIONAL_CLOSE, "handle dropped".to_string()))
        );
    }
}
