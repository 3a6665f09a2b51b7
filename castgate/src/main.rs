mod server;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};

use castgate_core::{Config, StatusSample, config::parse_duration, logging, netif, notify};
use castgate_proxy::{HlsGauge, ProxyState};
use castgate_stream::{RtpHandlerState, RtpServer};

#[derive(Parser, Debug)]
#[command(name = "castgate")]
#[command(about = "Multicast RTP and HLS streaming gateway", long_about = None)]
struct Args {
    /// HTTP listen address
    #[arg(short = 'l', long = "listen", env = "CASTGATE_LISTEN", default_value = "127.0.0.1:18090")]
    listen: String,

    /// Multicast-capable interface name
    #[arg(short = 'i', long = "interface", env = "CASTGATE_INTERFACE", default_value = "eth0")]
    interface: String,

    /// Initial multicast read timeout
    #[arg(short = 'o', long = "timeout", env = "CASTGATE_TIMEOUT", default_value = "1s", value_parser = parse_duration)]
    timeout: Duration,

    /// Debug logging
    #[arg(short = 'd', long = "debug", env = "CASTGATE_DEBUG")]
    debug: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            interface: args.interface,
            first_packet_timeout: args.timeout,
            debug: args.debug,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from(Args::parse());
    logging::init_logging(config.debug);

    // Multicast is optional: without a usable interface the /rtp/
    // routes answer 500 and the proxy still runs.
    let interface = netif::multicast_interface_addr(&config.interface);
    let rtp_server = match interface {
        Some(addr) => {
            info!("multicast interface {} ({addr})", config.interface);
            Some(Arc::new(RtpServer::new(addr)))
        }
        None => {
            warn!(
                "multicast interface {} not usable, RTP disabled",
                config.interface
            );
            None
        }
    };
    let gauge = HlsGauge::default();

    if let Err(e) = notify::sd_notify("READY=1").await {
        debug!("sd_notify failed: {e}");
    }
    {
        let rtp_server = rtp_server.clone();
        let gauge = gauge.clone();
        notify::spawn_status_reporter(move || {
            let (rtp_streams, rtp_subscribers) =
                rtp_server.as_ref().map_or((0, 0), |server| server.count());
            StatusSample {
                rtp_streams,
                rtp_subscribers,
                hls_clients: gauge.get(),
            }
        });
    }

    let app = server::build_router(
        RtpHandlerState {
            server: rtp_server,
            first_packet_timeout: config.first_packet_timeout,
        },
        ProxyState { gauge },
    );

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    info!("shutdown signal received");
}
