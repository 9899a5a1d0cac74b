//! Opt-in file logging.
//!
//! stdout carries protocol output and stderr carries the single failure
//! line, so diagnostics must go elsewhere. Setting `TURFWAR_LOG_DIR` to a
//! directory enables a trace-level log file there; without it no
//! subscriber is installed and tracing calls are no-ops.

use std::fs::File;
use std::path::Path;

use time::format_description;
use time::OffsetDateTime;
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::FmtSubscriber;

/// Environment variable naming the log directory.
pub const LOG_DIR_ENV: &str = "TURFWAR_LOG_DIR";

/// Install the file subscriber if `TURFWAR_LOG_DIR` is set.
///
/// Best-effort: an unusable directory or a second initialisation disables
/// logging rather than disturbing the process.
pub fn init_from_env() {
    let Some(dir) = std::env::var_os(LOG_DIR_ENV) else {
        return;
    };
    init_in_dir(Path::new(&dir));
}

fn init_in_dir(dir: &Path) {
    let Ok(file) = File::create(dir.join(log_file_name())) else {
        return;
    };
    let writer = BoxMakeWriter::new(file);
    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let Ok(format) = format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
    else {
        return;
    };
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(offset, format);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    let _ = set_global_default(subscriber);
}

fn log_file_name() -> String {
    let stamp = format_description::parse("[year]-[month]-[day]_[hour]-[minute]-[second]")
        .expect("static format description");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    match now.format(&stamp) {
        Ok(s) => format!("{s}_log.txt"),
        Err(_) => "turfwar_log.txt".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_name_has_suffix() {
        assert!(log_file_name().ends_with("_log.txt"));
    }
}
