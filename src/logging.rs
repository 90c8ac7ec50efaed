use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter, Metadata, SetLoggerError};

/// Crates of this workspace, as they appear in log targets
const LOCAL_CRATES: [&str; 3] = ["tandem", "tandem_server", "tandem_collab"];

/// Installs the global logger. Workspace crates log at `level`, dependencies only
/// warnings and errors. Warnings and errors are written to stderr, the rest to stdout.
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    let stderr = fern::Dispatch::new()
        .filter(|meta| meta.level() <= Level::Warn)
        .chain(std::io::stderr());

    let stdout = fern::Dispatch::new()
        .filter(|meta| meta.level() > Level::Warn)
        .chain(std::io::stdout());

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {} {:^8} {}",
                badge(record.level()),
                chrono::Local::now().format("%H:%M:%S").to_string().bright_black(),
                label(record.target()),
                message
            ))
        })
        .filter(move |meta| is_visible(meta, level))
        .chain(stderr)
        .chain(stdout)
        .apply()
}

fn crate_of(target: &str) -> &str {
    target.split("::").next().unwrap_or(target)
}

fn is_visible(meta: &Metadata, level: LevelFilter) -> bool {
    if LOCAL_CRATES.contains(&crate_of(meta.target())) {
        meta.level() <= level
    } else {
        meta.level() <= Level::Warn
    }
}

fn label(target: &str) -> ColoredString {
    match crate_of(target) {
        "tandem" => "TANDEM".blue(),
        "tandem_server" => "SERVER".bright_green(),
        "tandem_collab" => "COLLAB".bright_purple(),
        other => other.normal(),
    }
}

fn badge(level: Level) -> ColoredString {
    match level {
        Level::Error => " ERR ".black().on_red().bold(),
        Level::Warn => " WRN ".black().on_yellow().bold(),
        Level::Info => " INF ".black().on_blue().bold(),
        Level::Debug => " DBG ".white().on_black(),
        Level::Trace => " TRC ".normal(),
    }
}
