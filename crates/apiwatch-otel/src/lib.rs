use apiwatch_core::util::{env_bool, parse_bool_flag};
use once_cell::sync::OnceCell;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

pub const ENV_LOG_ROLL: &str = "APIWATCH_LOG_ROLL";
pub const ENV_LOG_DIR: &str = "APIWATCH_LOG_DIR";
pub const ENV_LOG_PREFIX: &str = "APIWATCH_LOG_PREFIX";
pub const ENV_LOG_ROTATION: &str = "APIWATCH_LOG_ROTATION";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
}

impl Rotation {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hourly" => Rotation::Hourly,
            "minutely" => Rotation::Minutely,
            _ => Rotation::Daily,
        }
    }
}

/// Where the rolling poll log goes, when enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLog {
    pub dir: String,
    pub prefix: String,
    pub rotation: Rotation,
}

impl FileLog {
    /// `None` unless `APIWATCH_LOG_ROLL` is a truthy flag.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let enabled = lookup(ENV_LOG_ROLL)
            .as_deref()
            .and_then(parse_bool_flag)
            .unwrap_or(false);
        if !enabled {
            return None;
        }
        Some(Self {
            dir: lookup(ENV_LOG_DIR).unwrap_or_else(|| "logs".to_string()),
            prefix: lookup(ENV_LOG_PREFIX).unwrap_or_else(|| "apiwatch".to_string()),
            rotation: lookup(ENV_LOG_ROTATION)
                .map(|r| Rotation::parse(&r))
                .unwrap_or(Rotation::Daily),
        })
    }
}

/// Install the global subscriber: console output filtered by `RUST_LOG`
/// (default `info`), plus a rolling file of poll activity when
/// `APIWATCH_LOG_ROLL` is set. Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(fmt::layer().with_filter(filter));

    let Some(file) = FileLog::from_env() else {
        let _ = registry.try_init();
        return;
    };
    if std::fs::create_dir_all(&file.dir).is_err() {
        tracing::warn!(directory = %file.dir, "failed to create log directory");
    }
    let writer = match file.rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(&file.dir, &file.prefix),
        Rotation::Minutely => tracing_appender::rolling::minutely(&file.dir, &file.prefix),
        Rotation::Daily => tracing_appender::rolling::daily(&file.dir, &file.prefix),
    };
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = FILE_GUARD.set(guard);
    let level = if env_bool("APIWATCH_LOG_DEBUG").unwrap_or(false) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let targets = Targets::new()
        .with_target("apiwatch_core", level)
        .with_target("apiwatch_cli", level);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(nb)
        .with_filter(targets);
    let _ = registry.with(file_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn file_log_is_off_unless_flag_is_truthy() {
        assert_eq!(FileLog::from_lookup(lookup(&[])), None);
        assert_eq!(FileLog::from_lookup(lookup(&[(ENV_LOG_ROLL, "0")])), None);
        assert_eq!(FileLog::from_lookup(lookup(&[(ENV_LOG_ROLL, "maybe")])), None);
    }

    #[test]
    fn file_log_defaults_and_overrides() {
        let defaults = FileLog::from_lookup(lookup(&[(ENV_LOG_ROLL, "yes")])).unwrap();
        assert_eq!(defaults.dir, "logs");
        assert_eq!(defaults.prefix, "apiwatch");
        assert_eq!(defaults.rotation, Rotation::Daily);

        let custom = FileLog::from_lookup(lookup(&[
            (ENV_LOG_ROLL, "1"),
            (ENV_LOG_DIR, "/var/log/apiwatch"),
            (ENV_LOG_ROTATION, "Hourly"),
        ]))
        .unwrap();
        assert_eq!(custom.dir, "/var/log/apiwatch");
        assert_eq!(custom.rotation, Rotation::Hourly);
    }
}
