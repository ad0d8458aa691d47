/// Initializes logging for the application
///
/// Logs go to stderr. `RUST_LOG` overrides the default level, which is Debug
/// in development builds and Info in production builds.
pub fn init() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    // Ignore the error if a logger is already installed (tests)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .try_init();
}
