//! Process-wide logger setup.

/// Install the env_logger backend. `RUST_LOG` overrides the default `info`
/// filter. Calling it again is a no-op.
pub fn init() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        log::info!("logger installed");
    }
}
