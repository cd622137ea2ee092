use tracing_subscriber::EnvFilter;

/// Overrides the verbosity flags when set, e.g. `PORTCULLIS_LOG=portcullis_eval=debug`.
pub(crate) const LOG_ENV: &str = "PORTCULLIS_LOG";

/// Log to stderr so stdout stays machine-readable.
pub(crate) fn init(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
