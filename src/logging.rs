//! Console log format for the admin CLI
//!
//! One line per event, prefixed by a glyph for its level. Debug events also
//! carry the module path and line number.

use std::fmt;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default)]
pub struct LevelGlyphs;

impl LevelGlyphs {
    fn glyph(level: &Level) -> &'static str {
        match *level {
            Level::ERROR => "❌",
            Level::WARN => "⚠️",
            Level::INFO => "ℹ️",
            Level::DEBUG => "🐞",
            Level::TRACE => "🔍",
        }
    }
}

impl<S, N> FormatEvent<S, N> for LevelGlyphs
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        write!(writer, "{}  ", Self::glyph(meta.level()))?;
        if *meta.level() >= Level::DEBUG {
            write!(
                writer,
                "{}: {}: ",
                meta.module_path().unwrap_or_else(|| meta.target()),
                meta.line().unwrap_or(0)
            )?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(filter)
        .event_format(LevelGlyphs)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let out = Capture::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(Level::DEBUG)
            .event_format(LevelGlyphs)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_info_line() {
        let out = capture(|| tracing::info!("Started map-server with pid 42."));
        assert_eq!(out, "ℹ️  Started map-server with pid 42.\n");
    }

    #[test]
    fn test_error_and_warn_glyphs() {
        let out = capture(|| {
            tracing::error!("boom");
            tracing::warn!("careful");
        });
        assert_eq!(out, "❌  boom\n⚠️  careful\n");
    }

    #[test]
    fn test_debug_has_location() {
        let out = capture(|| tracing::debug!("details"));
        assert!(out.starts_with("🐞  autolycus::logging::tests: "));
        assert!(out.ends_with(": details\n"));
    }
}
