//! Log output for the pcbook server.
//!
//! `RUST_LOG` wins whenever it parses. Otherwise `LOG_LEVEL` sets the level of
//! pcbook's own events and the gRPC transport crates stay at `warn`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Transport crates that log every frame and connection at debug.
const TRANSPORT_TARGETS: &[&str] = &["tonic", "h2", "hyper", "tower", "axum"];

const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per event, span fields flattened in.
    Json,
}

impl LogFormat {
    /// `json` in any case selects JSON; anything else, or nothing, is human readable.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Human,
        }
    }
}

/// Directives applied when `RUST_LOG` is unset or does not parse.
pub fn default_directives(level: &str) -> String {
    let mut directives = format!("pcbook={level}");
    for target in TRANSPORT_TARGETS {
        directives.push(',');
        directives.push_str(target);
        directives.push_str("=warn");
    }
    directives
}

/// Chooses the filter directives from the `RUST_LOG` and `LOG_LEVEL` values.
pub fn filter_directives(rust_log: Option<&str>, log_level: Option<&str>) -> String {
    if let Some(raw) = rust_log.map(str::trim).filter(|raw| !raw.is_empty()) {
        if EnvFilter::try_new(raw).is_ok() {
            return raw.to_string();
        }
    }

    let level = log_level
        .map(str::trim)
        .filter(|level| level.parse::<tracing::Level>().is_ok())
        .unwrap_or(DEFAULT_LEVEL);
    default_directives(&level.to_ascii_lowercase())
}

/// Installs the global subscriber. A second call leaves the first one in place.
pub fn init(format: LogFormat, directives: &str) {
    let registry = tracing_subscriber::registry().with(EnvFilter::new(directives));
    let installed = match format {
        LogFormat::Human => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
    };

    match installed {
        Ok(()) => tracing::info!(?format, %directives, "logging initialized"),
        Err(e) => tracing::debug!(error = %e, "subscriber already installed"),
    }
}

/// Reads `LOG_FORMAT`, `RUST_LOG` and `LOG_LEVEL`, then calls [`init`].
///
/// ```bash
/// LOG_FORMAT=json LOG_LEVEL=debug pcbook --config pcbook.toml
/// ```
pub fn init_from_env() {
    let var = |name: &str| std::env::var(name).ok();
    let format = LogFormat::from_env_value(var("LOG_FORMAT").as_deref());
    let directives = filter_directives(var("RUST_LOG").as_deref(), var("LOG_LEVEL").as_deref());
    init(format, &directives);
}
