//! Secure CoAP client binary
//!
//! Connects to a single peer over a PSK-secured session, sends one CoAP
//! request, and prints the response.

use clap::{Parser, ValueEnum};
use coaps_bridge::{
    packet_channel, ClientError, Code, CoapMessage, Config, ConnectedCallback, MessageType,
    RequestBuilder, ResponseHandler, SecureClient, UdpTransport,
};
use rand::{Rng, RngCore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Send one CoAP request over a secure session
#[derive(Parser, Debug)]
#[command(name = "coaps-client", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Peer address (overrides `peer`)
    #[arg(short, long)]
    peer: Option<SocketAddr>,

    /// Hex pre-shared key (overrides `session.psk`)
    #[arg(long, value_name = "HEX")]
    psk: Option<String>,

    /// Local bind address (overrides `transport.bind_addr`)
    #[arg(long)]
    bind: Option<String>,

    /// Request method
    #[arg(short, long, value_enum, default_value_t = Method::Get)]
    method: Method,

    /// Uri-Path, '/'-separated
    #[arg(long, default_value = "")]
    path: String,

    /// Request payload
    #[arg(long)]
    payload: Option<String>,

    /// Seconds to wait for handshake and response
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn code(self) -> Code {
        match self {
            Method::Get => Code::GET,
            Method::Post => Code::POST,
            Method::Put => Code::PUT,
            Method::Delete => Code::DELETE,
        }
    }
}

type Response = Result<Vec<u8>, ClientError>;

/// Wait on an optional receiver; pends forever once taken.
async fn wait_for<T>(rx: &mut Option<oneshot::Receiver<T>>) -> Result<T, oneshot::error::RecvError> {
    match rx {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

fn fail(msg: impl std::fmt::Display) -> ! {
    error!("{}", msg);
    std::process::exit(1);
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let (mut config, loaded_paths) = if let Some(config_path) = &args.config {
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => fail(format!(
                "Failed to load configuration from {}: {}",
                config_path.display(),
                e
            )),
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => fail(format!("Failed to load configuration: {}", e)),
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    if let Some(psk) = args.psk.clone() {
        config.session.psk = Some(psk);
    }
    if let Some(bind) = args.bind.clone() {
        config.transport.bind_addr = Some(bind);
    }

    let peer = match args.peer {
        Some(peer) => peer,
        None => match config.peer_addr() {
            Ok(Some(peer)) => peer,
            Ok(None) => fail("No peer given (--peer or `peer` in config)"),
            Err(e) => fail(e),
        },
    };

    let session = config.create_session().unwrap_or_else(|e| fail(e));

    let (packet_tx, mut packet_rx) = packet_channel(64);
    let mut transport = UdpTransport::new(config.transport.clone(), packet_tx);
    let local_addr = match transport.bind().await {
        Ok(addr) => addr,
        Err(e) => fail(format!("Failed to bind UDP socket: {}", e)),
    };
    info!(local_addr = %local_addr, peer = %peer, "Connecting");

    let mut bridge =
        SecureClient::with_config(session, transport, config.create_pool(), &config.bridge);

    let (connected_tx, connected_rx) = oneshot::channel::<()>();
    let on_connected: ConnectedCallback = Box::new(move || {
        let _ = connected_tx.send(());
    });
    if let Err(e) = bridge.connect(peer, Some(on_connected)) {
        fail(format!("Failed to connect: {}", e));
    }
    bridge.run_tasklets();

    let mut connected_rx = Some(connected_rx);
    let mut response_rx: Option<oneshot::Receiver<Response>> = None;

    let deadline = tokio::time::sleep(Duration::from_secs(args.timeout));
    tokio::pin!(deadline);

    let outcome: Result<Vec<u8>, String> = loop {
        tokio::select! {
            packet = packet_rx.recv() => match packet {
                Some(packet) => bridge.handle_datagram(packet),
                None => break Err("receive loop ended".to_string()),
            },
            connected = wait_for(&mut connected_rx) => {
                connected_rx = None;
                if connected.is_err() {
                    break Err("session closed during handshake".to_string());
                }
                info!(peer = %peer, "Secure session established, sending request");

                let mut rng = rand::thread_rng();
                let mut token = [0u8; 4];
                rng.fill_bytes(&mut token);
                let request = RequestBuilder::new(
                    MessageType::Confirmable,
                    args.method.code(),
                    rng.gen(),
                    &token,
                )
                .map(|b| b.uri_path(&args.path))
                .map(|b| match &args.payload {
                    Some(payload) => b.payload(payload.as_bytes()),
                    None => b,
                })
                .and_then(|b| b.build(bridge.pool()));
                let request = match request {
                    Ok(request) => request,
                    Err(e) => break Err(format!("cannot build request: {}", e)),
                };

                let (tx, rx) = oneshot::channel();
                let handler: ResponseHandler = Box::new(move |result| {
                    let _ = tx.send(result.map(|m| m.as_bytes().to_vec()));
                });
                if let Err(e) = bridge.send_message(request, Some(handler)) {
                    break Err(format!("send failed: {}", e));
                }
                response_rx = Some(rx);
            },
            response = wait_for(&mut response_rx) => {
                response_rx = None;
                match response {
                    Ok(Ok(bytes)) => break Ok(bytes),
                    Ok(Err(e)) => break Err(format!("request failed: {}", e)),
                    Err(_) => break Err("response handler dropped".to_string()),
                }
            },
            _ = &mut deadline => {
                let phase = if bridge.is_connected() { "response" } else { "handshake" };
                break Err(format!("timed out waiting for {}", phase));
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                break Err("interrupted".to_string());
            },
        }
        bridge.run_tasklets();
    };

    let succeeded = outcome.is_ok();
    match outcome {
        Ok(bytes) => match CoapMessage::parse(&bytes) {
            Ok(response) => {
                println!("{}", response.header.code);
                if !response.payload.is_empty() {
                    println!("{}", String::from_utf8_lossy(response.payload));
                }
            }
            Err(e) => warn!(error = %e, "Response did not parse"),
        },
        Err(e) => error!("{}", e),
    }

    if bridge.is_connection_started() {
        if let Err(e) = bridge.disconnect() {
            debug!(error = %e, "Disconnect failed");
        }
        // Close record leaves before the socket goes away
        bridge.run_tasklets();
    }
    bridge.stop();

    info!(stats = ?bridge.stats(), "Secure client finished");
    if let Err(e) = bridge.socket_mut().close().await {
        warn!("Error during shutdown: {}", e);
    }

    if !succeeded {
        std::process::exit(1);
    }
}
