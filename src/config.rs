use crate::error::ConfigError;
use anyhow::{Context, Result};
use chrono::{Duration, FixedOffset};
use clap::Parser;
use log::{info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const SECTION_BACKEND_MOBAPI: &str = "backend_mobapi";
pub const SECTION_FRONTEND_NEXTJS: &str = "frontend_nextjs";
pub const SECTION_FRONTEND_NEXTJS_PODS: &str = "frontend_nextjs_pods";

/// Query-set name and the variable holding its queries, in display order.
const QUERY_SET_VARS: [(&str, &str); 3] = [
    (SECTION_BACKEND_MOBAPI, "GRAYLOG_QUERIES_BACKEND_MOBAPI"),
    (SECTION_FRONTEND_NEXTJS, "GRAYLOG_QUERIES_FRONTEND_NEXTJS"),
    (SECTION_FRONTEND_NEXTJS_PODS, "GRAYLOG_QUERIES_FRONTEND_NEXTJS_PODS"),
];

const PODS_TIME_FRAME_VAR: &str = "GRAYLOG_QUERIES_FRONTEND_NEXTJS_PODS_TIME_FRAME";

const DEFAULT_ERROR_WORDS: &[&str] = &[
    "error",
    "fail",
    "unknown",
    "not",
    "err",
    "exception",
    "eof",
    "crash",
    "fatal",
    "unexpected",
];
const DEFAULT_WARNING_WORDS: &[&str] = &["warning"];

pub const DEFAULT_SYSTEM_PROMPT: &str = "Analyze this error and provide RCA.";

#[derive(Parser, Debug)]
#[clap(name = "issue-tracer", version, about)]
pub struct Cli {
    /// Path to a dotenv file loaded before reading the environment
    #[clap(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Override the listen address
    #[clap(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct GraylogConfig {
    pub domain: String,
    pub auth: Credentials,
}

#[derive(Clone)]
pub struct AiEndpoint {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

impl fmt::Debug for AiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiEndpoint")
            .field("host", &self.host)
            .field("api_key", &"***")
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    /// `None` unless host, key and model are all set.
    pub endpoint: Option<AiEndpoint>,
    pub system_prompt: String,
    pub results_dir: PathBuf,
}

/// Date/time strings used when a search omits part of its range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultRange {
    pub start_date: String,
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySet {
    pub name: String,
    pub queries: Vec<String>,
    /// Trailing window searched instead of the requested range.
    pub time_frame: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightWords {
    pub error: Vec<String>,
    pub warning: Vec<String>,
    pub special: Vec<String>,
    pub success: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub timezone: FixedOffset,
    pub session_ttl: Duration,
    pub default_range: DefaultRange,
    pub credentials: Credentials,
    pub graylog: GraylogConfig,
    pub query_sets: Vec<QuerySet>,
    pub output_fields: Vec<String>,
    /// Lowercased, trimmed, empties dropped.
    pub filter_keywords: Vec<String>,
    pub highlight: HighlightWords,
    pub ai: AiConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_vars<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string());
        let required = |key: &'static str| {
            get(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let credentials = Credentials {
            username: required("USER_USERNAME")?,
            password: required("USER_PASSWORD")?,
        };

        let graylog = GraylogConfig {
            domain: required("GRAYLOG_DOMAIN")?.trim_end_matches('/').to_string(),
            auth: Credentials {
                username: required("GRAYLOG_USERNAME")?,
                password: required("GRAYLOG_PASSWORD")?,
            },
        };

        let pods_time_frame = match get(PODS_TIME_FRAME_VAR) {
            Some(raw) => parse_time_frame(&raw).map_err(|reason| ConfigError::InvalidValue {
                var: PODS_TIME_FRAME_VAR,
                reason,
            })?,
            None => None,
        };

        let mut query_sets = Vec::with_capacity(QUERY_SET_VARS.len());
        for (name, var) in QUERY_SET_VARS {
            let queries = parse_string_list(var, get(var).as_deref())?.unwrap_or_default();
            let time_frame = if name == SECTION_FRONTEND_NEXTJS_PODS {
                pods_time_frame
            } else {
                None
            };
            query_sets.push(QuerySet {
                name: name.to_string(),
                queries,
                time_frame,
            });
        }

        let output_fields =
            parse_string_list("GRAYLOG_OUTPUT_FIELDS", get("GRAYLOG_OUTPUT_FIELDS").as_deref())?
                .unwrap_or_default();

        let filter_keywords = parse_string_list(
            "GRAYLOG_FILTER_KEYWORDS",
            get("GRAYLOG_FILTER_KEYWORDS").as_deref(),
        )?
        .unwrap_or_default()
        .into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

        let words = |var: &'static str, default: &[&str]| -> Result<Vec<String>, ConfigError> {
            let list = parse_string_list(var, get(var).as_deref())?
                .unwrap_or_else(|| default.iter().map(|w| w.to_string()).collect());
            Ok(list
                .into_iter()
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect())
        };
        let highlight = HighlightWords {
            error: words("HIGHLIGHT_ERROR_WORDS", DEFAULT_ERROR_WORDS)?,
            warning: words("HIGHLIGHT_WARNING_WORDS", DEFAULT_WARNING_WORDS)?,
            special: words("HIGHLIGHT_SPECIAL_WORDS", &[])?,
            success: words("HIGHLIGHT_SUCCESS_WORDS", &[])?,
        };

        let default_range = DefaultRange {
            start_date: get("START_DATE").unwrap_or_default(),
            start_time: get("START_TIME")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "00:00".to_string()),
            end_date: get("END_DATE").unwrap_or_default(),
            end_time: get("END_TIME")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "23:59".to_string()),
        };

        let timezone = match get("TIMEZONE_OFFSET").filter(|v| !v.is_empty()) {
            Some(raw) => parse_offset(&raw).ok_or_else(|| ConfigError::InvalidValue {
                var: "TIMEZONE_OFFSET",
                reason: format!("expected +HH:MM or -HH:MM, got {:?}", raw),
            })?,
            None => FixedOffset::east_opt(3 * 3600 + 30 * 60).ok_or_else(|| {
                ConfigError::InvalidValue {
                    var: "TIMEZONE_OFFSET",
                    reason: "default offset out of range".to_string(),
                }
            })?,
        };

        let session_ttl = match get("SESSION_TTL_SECS").filter(|v| !v.is_empty()) {
            Some(raw) => {
                let secs: i64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    var: "SESSION_TTL_SECS",
                    reason: format!("not a number: {:?}", raw),
                })?;
                if secs <= 0 {
                    return Err(ConfigError::InvalidValue {
                        var: "SESSION_TTL_SECS",
                        reason: format!("must be positive, got {}", secs),
                    });
                }
                Duration::try_seconds(secs).ok_or_else(|| ConfigError::InvalidValue {
                    var: "SESSION_TTL_SECS",
                    reason: format!("out of range: {}", secs),
                })?
            }
            None => Duration::hours(12),
        };

        let bind_addr = get("BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "127.0.0.1:5000".to_string());
        let bind_addr = bind_addr.parse().map_err(|e| ConfigError::InvalidValue {
            var: "BIND_ADDR",
            reason: format!("{}", e),
        })?;

        let non_empty = |key: &str| get(key).filter(|v| !v.is_empty());
        let endpoint = match (non_empty("AI_HOST"), non_empty("AI_API_KEY"), non_empty("AI_MODEL")) {
            (Some(host), Some(api_key), Some(model)) => Some(AiEndpoint {
                host: host.trim_end_matches('/').to_string(),
                api_key,
                model,
            }),
            _ => None,
        };
        let ai = AiConfig {
            endpoint,
            system_prompt: non_empty("AI_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            results_dir: non_empty("AI_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ai-results")),
        };

        Ok(Config {
            bind_addr,
            timezone,
            session_ttl,
            default_range,
            credentials,
            graylog,
            query_sets,
            output_fields,
            filter_keywords,
            highlight,
            ai,
        })
    }

    pub fn query_set(&self, name: &str) -> Option<&QuerySet> {
        self.query_sets.iter().find(|set| set.name == name)
    }
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    match dotenvy::from_path(&cli.env_file) {
        Ok(()) => info!("Loaded environment from {:?}", cli.env_file),
        Err(e) if e.not_found() => {
            info!("No env file at {:?}, using process environment", cli.env_file)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read env file: {:?}", cli.env_file))
        }
    }

    let mut config = Config::from_env().context("Invalid configuration")?;

    // Apply CLI overrides
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    if config.ai.endpoint.is_none() {
        warn!("AI endpoint not configured; RCA requests will be rejected");
    }

    Ok(config)
}

/// `None` for an unset or blank variable.
fn parse_string_list(var: &'static str, raw: Option<&str>) -> Result<Option<Vec<String>>, ConfigError> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };
    serde_json::from_str::<Vec<String>>(raw)
        .map(Some)
        .map_err(|e| ConfigError::InvalidList {
            var,
            reason: e.to_string(),
        })
}

/// Accepts `4s`, `1m`, `2h` or plain seconds; zero means no override.
fn parse_time_frame(raw: &str) -> Result<Option<Duration>, String> {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return Ok(None);
    }
    let (digits, unit) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 3600),
        _ => (s.as_str(), 1),
    };
    let digits = digits.trim();
    let n: i64 = if digits.is_empty() {
        0
    } else {
        digits
            .parse()
            .map_err(|_| format!("expected e.g. 4s, 1m or 2h, got {:?}", raw))?
    };
    if n < 0 {
        return Err(format!("negative time frame: {:?}", raw));
    }
    if n == 0 {
        return Ok(None);
    }
    n.checked_mul(unit)
        .and_then(Duration::try_seconds)
        .map(Some)
        .ok_or_else(|| format!("time frame out of range: {:?}", raw))
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => (1, raw),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
