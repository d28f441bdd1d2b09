use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use jobchat_contracts::{DEFAULT_DISPLAY_THRESHOLD, MAX_ROW_CAP};

pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama3-8b-8192";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub db_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout: Duration,
    pub query_timeout: Duration,
    pub migrate_on_startup: bool,
    pub model_provider: ModelProvider,
    pub provider_base_url: String,
    pub provider_api_key: Option<ApiKey>,
    pub model: String,
    pub generation_timeout: Duration,
    pub summary_timeout: Duration,
    pub provider_retry: bool,
    pub row_cap: usize,
    pub display_threshold: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    Mock,
    External,
}

/// Provider credential; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

const DB_URL_ENV_KEYS: &[&str] = &["JOBCHAT_DB_URL", "DATABASE_URL"];
const API_KEY_ENV_KEYS: &[&str] = &["JOBCHAT_PROVIDER_API_KEY", "GROQ_API_KEY"];

impl ServerConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("JOBCHAT_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("JOBCHAT_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3001),
            "JOBCHAT_BIND_ADDR",
        )?;

        // The admin routes carry no authentication of their own.
        let allow_nonlocal_bind =
            parse_bool(kv.get("JOBCHAT_ALLOW_NONLOCAL_BIND")).unwrap_or(false);
        if !bind_addr.ip().is_loopback() && !allow_nonlocal_bind {
            return Err(StartupError {
                code: "ERR_NONLOCAL_BIND",
                message: "non-local bind requires JOBCHAT_ALLOW_NONLOCAL_BIND=1".to_string(),
            });
        }

        let db_url = first_nonempty_env_value(kv, DB_URL_ENV_KEYS)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "missing required config key JOBCHAT_DB_URL".to_string(),
            })?;

        let db_max_connections = parse_u32(
            kv.get("JOBCHAT_DB_MAX_CONNECTIONS"),
            8,
            "JOBCHAT_DB_MAX_CONNECTIONS",
        )?;
        if db_max_connections == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "JOBCHAT_DB_MAX_CONNECTIONS must be > 0".to_string(),
            });
        }

        let db_connect_timeout = parse_timeout_ms(
            kv.get("JOBCHAT_DB_CONNECT_TIMEOUT_MS"),
            2_000,
            "JOBCHAT_DB_CONNECT_TIMEOUT_MS",
        )?;
        let query_timeout = parse_timeout_ms(
            kv.get("JOBCHAT_QUERY_TIMEOUT_MS"),
            5_000,
            "JOBCHAT_QUERY_TIMEOUT_MS",
        )?;
        let migrate_on_startup = parse_bool(kv.get("JOBCHAT_MIGRATE_ON_STARTUP")).unwrap_or(true);

        let model_provider = parse_model_provider(kv.get("JOBCHAT_MODEL_PROVIDER"))?;
        let provider_base_url = kv
            .get("JOBCHAT_PROVIDER_BASE_URL")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_PROVIDER_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if !provider_base_url.starts_with("http://") && !provider_base_url.starts_with("https://")
        {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "JOBCHAT_PROVIDER_BASE_URL must be an http(s) URL".to_string(),
            });
        }

        let provider_api_key = first_nonempty_env_value(kv, API_KEY_ENV_KEYS)
            .map(|v| ApiKey(v.trim().to_string()));
        if model_provider == ModelProvider::External && provider_api_key.is_none() {
            return Err(StartupError {
                code: "ERR_MISSING_CONFIG",
                message: "external model provider requires JOBCHAT_PROVIDER_API_KEY or GROQ_API_KEY"
                    .to_string(),
            });
        }

        let model = kv
            .get("JOBCHAT_MODEL")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string();

        let generation_timeout = parse_timeout_ms(
            kv.get("JOBCHAT_GENERATION_TIMEOUT_MS"),
            15_000,
            "JOBCHAT_GENERATION_TIMEOUT_MS",
        )?;
        let summary_timeout = parse_timeout_ms(
            kv.get("JOBCHAT_SUMMARY_TIMEOUT_MS"),
            15_000,
            "JOBCHAT_SUMMARY_TIMEOUT_MS",
        )?;
        let provider_retry = parse_bool(kv.get("JOBCHAT_PROVIDER_RETRY")).unwrap_or(true);

        let row_cap = parse_usize(kv.get("JOBCHAT_ROW_CAP"), MAX_ROW_CAP, "JOBCHAT_ROW_CAP")?;
        if row_cap == 0 || row_cap > MAX_ROW_CAP {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: format!("JOBCHAT_ROW_CAP must be within 1..={}", MAX_ROW_CAP),
            });
        }

        let display_threshold = parse_usize(
            kv.get("JOBCHAT_DISPLAY_THRESHOLD"),
            DEFAULT_DISPLAY_THRESHOLD.min(row_cap),
            "JOBCHAT_DISPLAY_THRESHOLD",
        )?;
        if display_threshold == 0 || display_threshold > row_cap {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "JOBCHAT_DISPLAY_THRESHOLD must be > 0 and <= JOBCHAT_ROW_CAP".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            db_url,
            db_max_connections,
            db_connect_timeout,
            query_timeout,
            migrate_on_startup,
            model_provider,
            provider_base_url,
            provider_api_key,
            model,
            generation_timeout,
            summary_timeout,
            provider_retry,
            row_cap,
            display_threshold,
        })
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    parse_env_lines(&contents)
}

fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn first_nonempty_env_value<'a>(
    kv: &'a HashMap<String, String>,
    keys: &[&str],
) -> Option<&'a String> {
    keys.iter()
        .find_map(|key| kv.get(*key).filter(|value| !value.trim().is_empty()))
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_usize(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<usize>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_timeout_ms(
    value: Option<&String>,
    default_ms: u64,
    key: &'static str,
) -> Result<Duration, StartupError> {
    let ms = parse_u64(value, default_ms, key)?;
    if ms == 0 {
        return Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be > 0", key),
        });
    }
    Ok(Duration::from_millis(ms))
}

fn parse_model_provider(value: Option<&String>) -> Result<ModelProvider, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("mock");

    match mode {
        "mock" => Ok(ModelProvider::Mock),
        "external" => Ok(ModelProvider::External),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "JOBCHAT_MODEL_PROVIDER must be mock or external".to_string(),
        }),
    }
}

fn parse_bool(value: Option<&String>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}
