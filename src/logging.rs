use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `RUST_LOG` wins over `default_filter`; `log`
/// records from both crates are bridged into it. A second call keeps the
/// subscriber already installed.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
    {
        eprintln!("logging already initialised, keeping it: {e}");
    }
}
