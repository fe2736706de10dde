// logging.rs — tracing subscriber setup for the CLI
//
// Filter comes from `TKC_LOG` when set (e.g. `TKC_LOG=tkc::layout=debug`),
// otherwise `warn`, or `debug` with `--verbose`.

use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install the global subscriber; later calls are no-ops.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let default = if verbose { "tkc=debug" } else { "warn" };
        let filter = EnvFilter::try_from_env("TKC_LOG").unwrap_or_else(|_| EnvFilter::new(default));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    });
}
