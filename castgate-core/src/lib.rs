// castgate-core - shared infrastructure for the castgate gateway
//
// - config/     - runtime configuration and duration parsing
// - logging     - tracing subscriber setup
// - netif       - multicast interface resolution
// - notify      - systemd status notification (NOTIFY_SOCKET)
// - util        - small formatting helpers shared by access logs

pub mod config;
pub mod logging;
pub mod netif;
pub mod notify;
pub mod util;

pub use config::Config;
pub use notify::{StatusSample, sd_notify, spawn_status_reporter};
