use env_logger::{Builder, Env};
use std::io::Write;

/// Installs the global logger. `RUST_LOG` overrides the default `info` filter.
pub fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()))
        .init();
}
