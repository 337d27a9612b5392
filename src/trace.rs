use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber, events are written to stderr.
///
/// `levels` follows the `EnvFilter` directive syntax, e.g.
/// `info,ecs_sd::ecs=debug`. Invalid directives fall back to `info`.
/// Installing twice is a no-op, so tests can call it freely.
pub fn init(color: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|err| {
        eprintln!("invalid log levels {levels:?}, {err}");
        EnvFilter::new("info")
    });

    let _ = tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_ansi(color)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish()
        .try_init();
}
