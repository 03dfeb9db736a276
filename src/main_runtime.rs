use screenshot_broker::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "screenshot-broker.log";

fn default_directives(level: &str) -> String {
    let level = level.trim().to_ascii_lowercase();
    if level == "info" {
        "info,screenshot_broker=debug,sqlx=warn".to_string()
    } else {
        format!("{level},sqlx=warn")
    }
}

/// Daily rolling file writer, if `dir` can actually be written to.
///
/// `tracing_appender::rolling::daily` panics when it cannot open its first file,
/// so writability is checked up front.
fn file_writer(dir: &str) -> Option<tracing_appender::non_blocking::NonBlocking> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Warning: Could not create log directory {dir} ({e}), file logging disabled");
        return None;
    }

    let marker = std::path::Path::new(dir).join(".screenshot_broker_write_test");
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&marker);
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            // The process lives as long as the guard needs to
            Box::leak(Box::new(guard));
            Some(non_blocking)
        }
        Err(e) => {
            eprintln!("Warning: Could not write to log directory {dir} ({e}), file logging disabled");
            None
        }
    }
}

pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let file_layer = config.dir.as_deref().and_then(file_writer).map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });

    // Exactly one console layer is present
    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let plain_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(plain_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, config.dir.as_deref()) {
        eprintln!("Logging to: {dir}/{LOG_FILE}");
    }
}

pub fn init_logging_simple() {
    // Minimal logging for CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
