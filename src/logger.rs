use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};

/// Installs the process logger: `info` by default, `RUST_LOG` wins when set.
pub fn init() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    log::debug!("Logger initialized.");
}
