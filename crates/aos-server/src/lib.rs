//! # aos-server — HTTP(S) Listener
//!
//! Serve mode: one event→command cycle per accepted connection, handled to
//! completion before the next accept. Each connection gets its own event
//! source, serve executor, and syscall bridge, so no response state can
//! leak between requests. An `Exit` command latched during a cycle stops
//! the accept loop and its code becomes the process exit status.

pub mod http;
pub mod tls;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use aos_events::{ConsoleSink, HttpRequestSource, ServeExecutor};
use aos_kernel::{HostBridge, KernelHost};
use aos_tree::{HostError, Tree};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};

/// Certificate and private key paths, both PEM.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub port: u16,
    pub tls: Option<TlsPaths>,
    pub trace: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            tls: None,
            trace: false,
        }
    }
}

/// Runs the accept loop until a dispatched cycle latches an `Exit` command,
/// returning the requested exit code. TLS material loads before the first
/// accept; failure there is `TLS003` and nothing is ever served.
#[instrument(skip(host, program, permissions, console), fields(port = config.port, tls = config.tls.is_some()))]
pub async fn serve(
    host: &mut KernelHost,
    program: Option<Arc<Tree>>,
    permissions: BTreeSet<String>,
    console: Arc<dyn ConsoleSink>,
    config: &ServeConfig,
) -> Result<i32, HostError> {
    let acceptor = match &config.tls {
        Some(paths) => Some(tls::load_acceptor(&paths.cert, &paths.key)?),
        None => None,
    };

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(|err| {
            HostError::new("SRV001", format!("cannot bind port {}: {err}", config.port))
        })?;
    info!(port = config.port, "listener accepting connections");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        debug!(%peer, "connection accepted");

        let exit = match &acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    handle_connection(
                        tls_stream,
                        host,
                        program.as_ref(),
                        &permissions,
                        &console,
                        config.trace,
                    )
                    .await
                }
                Err(err) => {
                    // A failed handshake only costs that client.
                    debug!(%peer, %err, "TLS handshake failed");
                    None
                }
            },
            None => {
                handle_connection(
                    stream,
                    host,
                    program.as_ref(),
                    &permissions,
                    &console,
                    config.trace,
                )
                .await
            }
        };

        if let Some(code) = exit {
            info!(code, "exit requested; listener stopping");
            return Ok(code);
        }
    }
}

/// Handles one connection: parse the request head, dispatch one cycle
/// through a fresh bridge, write the buffered response. Returns the latched
/// exit code, if any. Malformed requests close the connection with no
/// dispatch.
async fn handle_connection<S>(
    mut stream: S,
    host: &mut KernelHost,
    program: Option<&Arc<Tree>>,
    permissions: &BTreeSet<String>,
    console: &Arc<dyn ConsoleSink>,
    trace: bool,
) -> Option<i32>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = http::read_head(&mut stream).await?;
    let request = match http::parse_request_line(&head) {
        Some(request) => request,
        None => {
            debug!("malformed request line; closing without dispatch");
            return None;
        }
    };

    let executor = ServeExecutor::with_console(console.clone());
    let response = executor.response_slot();
    let mut bridge = HostBridge::new(
        Box::new(HttpRequestSource::new(&request.method, &request.path)),
        Box::new(executor),
    )
    .with_permissions(permissions.clone())
    .with_console(console.clone())
    .with_trace(host.trace(), trace);
    if let Some(program) = program {
        bridge = bridge.with_user_program(program.clone());
    }
    let bridge = Arc::new(bridge);
    host.attach(bridge.clone());

    if let Err(err) = host.run_cycle() {
        // The cycle failed; this request gets an empty response and the
        // listener keeps serving.
        warn!(code = %err.code, message = %err.message, "dispatch cycle failed");
    }

    let body = response.take();
    let rendered = http::render_response(body.as_deref());
    if let Err(err) = stream.write_all(&rendered).await {
        debug!(%err, "response write failed");
    }
    let _ = stream.shutdown().await;

    bridge.exit_code()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use aos_events::MemorySink;
    use aos_kernel::{HostOptions, KernelHost, KernelSource};
    use aos_tree::Tree;
    use aos_wire::parse;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::handle_connection;

    fn bootstrapped_host() -> KernelHost {
        KernelHost::bootstrap(&KernelSource::builtin(), &HostOptions::default()).unwrap()
    }

    fn program(source: &str) -> Arc<Tree> {
        Arc::new(parse(source).root.unwrap())
    }

    async fn roundtrip(source: &str, request: &[u8]) -> (String, Option<i32>) {
        let mut host = bootstrapped_host();
        let program = program(source);
        let console: Arc<MemorySink> = Arc::new(MemorySink::default());
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(request).await.unwrap();

        let exit = handle_connection(
            server,
            &mut host,
            Some(&program),
            &BTreeSet::new(),
            &(console as Arc<dyn aos_events::ConsoleSink>),
            false,
        )
        .await;

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        (response, exit)
    }

    #[tokio::test]
    async fn health_request_gets_a_200_with_exact_content_length() {
        let (response, exit) = roundtrip(
            r#"(Program @app
                 (Quote (Command @Emit type="http.response" payload="{\"status\":\"ok\"}")))"#,
            b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 15\r\n"));
        assert!(response.ends_with(r#"{"status":"ok"}"#));
        assert_eq!(exit, None);
    }

    #[tokio::test]
    async fn cycle_without_response_emit_is_204() {
        let (response, exit) = roundtrip(
            r#"(Program @app (Lit value="no response here"))"#,
            b"GET / HTTP/1.1\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert_eq!(exit, None);
    }

    #[tokio::test]
    async fn exit_command_is_latched_and_reported() {
        let (response, exit) = roundtrip(
            r#"(Program @app (Quote (Command @Exit code=5)))"#,
            b"POST /shutdown HTTP/1.1\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert_eq!(exit, Some(5));
    }

    #[tokio::test]
    async fn malformed_request_line_closes_without_dispatch() {
        let (response, exit) = roundtrip(
            r#"(Program @app (Quote (Command @Exit code=5)))"#,
            b"GETONLY\r\n\r\n",
        )
        .await;
        // No dispatch happened: no response was written and no exit latched.
        assert!(response.is_empty());
        assert_eq!(exit, None);
    }

    #[tokio::test]
    async fn event_payload_carries_method_and_path() {
        let mut host = bootstrapped_host();
        let program = program(
            r#"(Program @app
                 (Call fn="print" (Call fn="attr" (Var name="event") (Lit value="payload"))))"#,
        );
        let sink = Arc::new(MemorySink::default());
        let console: Arc<dyn aos_events::ConsoleSink> = sink.clone();
        let mut permissions = BTreeSet::new();
        permissions.insert("console".to_owned());

        let (mut client, server) = tokio::io::duplex(4096);
        client
            .write_all(b"PUT /things/42 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        handle_connection(server, &mut host, Some(&program), &permissions, &console, false)
            .await;

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert_eq!(sink.lines(), vec!["PUT /things/42"]);
    }
}
