use env_logger::{Builder, Env};
use std::io::Write;

/// Variable holding the log filter, in `env_logger` syntax.
pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";

fn builder() -> Builder {
    let mut builder = Builder::from_env(Env::default().filter_or(LOG_LEVEL_VAR, "info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{:5} | {:>15}:{:<4} | {} | {}",
            record.level(),
            record.file().unwrap_or("unknown file"),
            record.line().unwrap_or(0),
            buf.timestamp(),
            record.args()
        )
    });
    builder
}

/// Installs the global logger. Panics if one is already set.
pub fn init() {
    builder().init();
}

/// Like [`init`], but a logger that is already installed is left in place.
pub fn try_init() -> Result<(), log::SetLoggerError> {
    builder().is_test(cfg!(test)).try_init()
}
