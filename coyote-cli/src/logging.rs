//! Installs the process's `tracing-subscriber` layer, honoring the
//! `verbosity`/`console_logging` options from `coyote_core::RuntimeConfig`
//! the same way the teacher's binary calls `tracing_subscriber::fmt::init`
//! once at the top of `main`.

use coyote_core::config::Verbosity;
use tracing_subscriber::EnvFilter;

pub fn init(verbosity: Verbosity, console_logging: bool) {
    if !console_logging {
        return;
    }
    let default_filter = match verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "info",
        Verbosity::Verbose => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
