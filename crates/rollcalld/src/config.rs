use std::path::PathBuf;
use std::str::FromStr;

use rollcall_core::DEFAULT_MATCH_THRESHOLD;

/// Which message bus the daemon claims its name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    System,
    Session,
}

impl BusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Session => "session",
        }
    }
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown bus: {other} (expected system or session)")),
        }
    }
}

/// Daemon configuration, built once at startup and handed to the service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Normalized Euclidean distance below which a face counts as matched.
    pub match_threshold: f32,
    /// Bus to serve on.
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = lookup("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("rollcall.db"));

        let match_threshold = parse_or(&lookup, "ROLLCALL_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD);
        let match_threshold = if match_threshold.is_finite() && match_threshold > 0.0 {
            match_threshold
        } else {
            tracing::warn!(
                value = match_threshold,
                "ROLLCALL_MATCH_THRESHOLD must be positive; using default"
            );
            DEFAULT_MATCH_THRESHOLD
        };

        Self {
            db_path,
            match_threshold,
            bus: parse_or(&lookup, "ROLLCALL_BUS", BusKind::System),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            tracing::warn!(key, value = %raw, error = %e, "invalid value; using default");
            default
        }),
    }
}
