use tracing_subscriber::EnvFilter;

/// Agent events at info; the HTTP stack only when it warns.
const DEFAULT_LOG_FILTER: &str = "info,hyper=warn,hyper_util=warn,h2=warn,rustls=warn";

/// `RUST_LOG` when set and parseable, otherwise [`DEFAULT_LOG_FILTER`].
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

pub(crate) fn init_tracing() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_target(false)
        .compact()
        .init();
}
