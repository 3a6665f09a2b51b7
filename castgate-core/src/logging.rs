use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the default level is `info`, or
/// `debug` when the `-d` flag was given. When the process runs under
/// systemd (parent pid 1) timestamps are dropped, the journal stamps
/// every line itself.
pub fn init_logging(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(env_filter)
        .compact();

    if std::os::unix::process::parent_id() == 1 {
        builder.without_time().init();
    } else {
        builder.init();
    }
}
