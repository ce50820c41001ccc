//! PII-safe logging. A dedicated filter masks ten-digit runs (plausible
//! national-identifier or date-of-birth fragments) and any key matching
//! `nationalId|dateOfBirth` before a line reaches the subscriber, so call
//! sites cannot accidentally leak a claims body no matter what they log.

use regex::Regex;
use std::sync::OnceLock;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::registry::LookupSpan;

fn ten_digit_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{10}\b").unwrap())
}

fn pii_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)"(nationalId|dateOfBirth)"\s*:\s*"[^"]*""#).unwrap())
}

/// Masks PII-shaped substrings in a pre-rendered log line. Exposed standalone
/// so callers that build their own strings (e.g. audit entries) can run it
/// without going through the tracing layer.
pub fn redact(line: &str) -> String {
    let masked = pii_key().replace_all(line, |caps: &regex::Captures| {
        format!("\"{}\":\"[REDACTED]\"", &caps[1])
    });
    ten_digit_run().replace_all(&masked, "[REDACTED]").into_owned()
}

/// A `tracing_subscriber` event formatter that redacts every rendered line
/// through [`redact`] before it is written. Installing this as the fmt
/// layer's `event_format` means no call site can bypass the filter, unlike a
/// convention of "just don't log claims".
pub struct SafeFormatter<F> {
    inner: F,
}

impl<F> SafeFormatter<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<S, N, F> FormatEvent<S, N> for SafeFormatter<F>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let mut buf = String::new();
        {
            let buf_writer = Writer::new(&mut buf);
            self.inner.format_event(ctx, buf_writer, event)?;
        }
        writer.write_str(&redact(&buf))
    }
}

/// Installs a global `tracing` subscriber with the PII redaction formatter
/// and an `EnvFilter` driven by `RUST_LOG`, matching the way the platform's
/// binaries (see `cli`) bootstrap logging once at startup.
pub fn init() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let fmt_layer = fmt::layer().event_format(SafeFormatter::new(fmt::format()));
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_ten_digit_runs() {
        let line = r#"subject reference 1234567890 processed"#;
        assert_eq!(redact(line), "subject reference [REDACTED] processed");
    }

    #[test]
    fn masks_pii_keyed_json_fields() {
        let line = r#"{"dateOfBirth":"2000-06-15","nationalId":"9001011234"}"#;
        let masked = redact(line);
        assert!(!masked.contains("2000-06-15"));
        assert!(!masked.contains("9001011234"));
    }

    #[test]
    fn leaves_unrelated_text_alone() {
        let line = "session started for provider bankid";
        assert_eq!(redact(line), line);
    }
}
