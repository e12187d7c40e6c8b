/// Initialize the tracing subscriber with an env-filter default.
///
/// Call once at startup; embedding hosts may install their own subscriber
/// instead, in which case this is a no-op (`try_init`).
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prism_gateway=info,prism_provider=info".into()),
        )
        .try_init();
}
