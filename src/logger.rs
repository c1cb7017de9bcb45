//! Logging setup for applications built on pose-graph-slam.
//!
//! The library itself only emits `tracing` events; nothing is printed unless a
//! subscriber is installed, e.g. with [`init_logger`].

use tracing::Level;

/// Install the standard subscriber at INFO level.
///
/// `RUST_LOG` takes precedence over the default level:
///
/// ```bash
/// RUST_LOG=pose_graph_slam=debug my-slam-app data/simulation.g2o
/// ```
///
/// Lines look like `[INFO 2024-05-01 12:00:00 pose_graph_slam::optimizer] ...`;
/// DEBUG and TRACE events show `file:line` instead of the module path.
///
/// # Example
/// ```no_run
/// pose_graph_slam::init_logger();
/// tracing::info!("Application started");
/// ```
pub fn init_logger() -> bool {
    init_logger_with_level(Level::INFO)
}

/// Install the standard subscriber with a custom default level.
///
/// Returns `false` if a global subscriber was already installed, in which case
/// the existing one is kept.
///
/// ```no_run
/// use tracing::Level;
///
/// pose_graph_slam::init_logger_with_level(Level::DEBUG);
/// tracing::debug!("Per-iteration table enabled");
/// ```
pub fn init_logger_with_level(default_level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .event_format(BracketFormatter)
        .try_init()
        .is_ok()
}

/// `[LEVEL timestamp origin] message`
struct BracketFormatter;

impl BracketFormatter {
    fn level_tag(level: Level) -> &'static str {
        match level {
            Level::ERROR => "\x1b[31mERROR\x1b[0m",
            Level::WARN => "\x1b[33mWARN\x1b[0m",
            Level::INFO => "\x1b[32mINFO\x1b[0m",
            Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
            Level::TRACE => "\x1b[35mTRACE\x1b[0m",
        }
    }
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for BracketFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = *metadata.level();

        write!(
            writer,
            "[{} {} ",
            Self::level_tag(level),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        match (level >= Level::DEBUG, metadata.file(), metadata.line()) {
            (true, Some(file), Some(line)) => {
                let filename = file.rsplit(['/', '\\']).next().unwrap_or(file);
                write!(writer, "{}:{}", filename, line)?;
            }
            _ => write!(writer, "{}", metadata.target())?,
        }

        write!(writer, "] ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_keeps_existing_subscriber() {
        init_logger_with_level(Level::WARN);
        assert!(!init_logger());
    }

    #[test]
    fn test_level_tags() {
        assert!(BracketFormatter::level_tag(Level::ERROR).contains("ERROR"));
        assert!(BracketFormatter::level_tag(Level::TRACE).contains("TRACE"));
    }
}
