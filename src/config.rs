//! Process configuration read once from the environment at startup.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;

pub const DEFAULT_ROSTER_TTL_SECS: u64 = 600;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_HTTP_PORT: u16 = 8501;
pub const DEFAULT_MAX_CODE_CHARS: usize = 11;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 12 * 60 * 60;
pub const DEFAULT_ANON_IDLE_SECS: u64 = 30 * 60;
pub const DEFAULT_MAX_ANON_SESSIONS: usize = 10_000;

/// Where the roster comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterLocation {
    /// A Google spreadsheet id, optionally narrowed to one worksheet by name.
    Sheet { id: String, worksheet: Option<String> },
    /// Any URL answering with CSV.
    Url(String),
    /// A local CSV export.
    File(PathBuf),
}

impl RosterLocation {
    /// Accepts a spreadsheet id, a spreadsheet URL, `file:<path>` or a path to a CSV.
    pub fn parse(raw: &str, worksheet: Option<String>) -> Result<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(anyhow!("empty roster source"));
        }
        if let Some(path) = s.strip_prefix("file:") {
            return Ok(RosterLocation::File(PathBuf::from(path)));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            if let Some(id) = spreadsheet_id_from_url(s) {
                return Ok(RosterLocation::Sheet { id, worksheet });
            }
            return Ok(RosterLocation::Url(s.to_string()));
        }
        if s.contains('/') || s.contains('\\') || s.to_ascii_lowercase().ends_with(".csv") {
            return Ok(RosterLocation::File(PathBuf::from(s)));
        }
        Ok(RosterLocation::Sheet { id: s.to_string(), worksheet })
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RosterLocation::Sheet { .. } => "sheet",
            RosterLocation::Url(_) => "url",
            RosterLocation::File(_) => "file",
        }
    }
}

/// Extract the id out of `https://docs.google.com/spreadsheets/d/<id>/edit...`.
fn spreadsheet_id_from_url(url: &str) -> Option<String> {
    let rest = url.split("/spreadsheets/d/").nth(1)?;
    let id: String = rest.chars().take_while(|c| *c != '/' && *c != '?' && *c != '#').collect();
    if id.is_empty() { None } else { Some(id) }
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub roster: RosterLocation,
    pub roster_ttl: Duration,
    pub fetch_timeout: Duration,
    pub bind: SocketAddr,
    pub max_code_chars: usize,
    pub session_idle: Duration,
    pub anonymous_idle: Duration,
    pub max_anonymous_sessions: usize,
    pub cookie_secure: bool,
    pub operator_token: Option<String>,
}

impl PortalConfig {
    /// Defaults for everything but the roster location.
    pub fn with_roster(roster: RosterLocation) -> Self {
        Self {
            roster,
            roster_ttl: Duration::from_secs(DEFAULT_ROSTER_TTL_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_HTTP_PORT),
            max_code_chars: DEFAULT_MAX_CODE_CHARS,
            session_idle: Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
            anonymous_idle: Duration::from_secs(DEFAULT_ANON_IDLE_SECS),
            max_anonymous_sessions: DEFAULT_MAX_ANON_SESSIONS,
            cookie_secure: true,
            operator_token: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let raw = env::var("PORTAL_ROSTER_SOURCE")
            .map_err(|_| anyhow!("PORTAL_ROSTER_SOURCE is not set (spreadsheet id, URL or CSV path)"))?;
        let worksheet = env::var("PORTAL_ROSTER_WORKSHEET").ok().filter(|s| !s.trim().is_empty());
        let mut cfg = Self::with_roster(RosterLocation::parse(&raw, worksheet)?);

        cfg.roster_ttl = Duration::from_secs(parse_env("PORTAL_ROSTER_TTL_SECS", DEFAULT_ROSTER_TTL_SECS));
        cfg.fetch_timeout = Duration::from_secs(parse_env("PORTAL_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS));
        cfg.max_code_chars = parse_env("PORTAL_MAX_CODE_CHARS", DEFAULT_MAX_CODE_CHARS);
        cfg.session_idle = Duration::from_secs(parse_env("PORTAL_SESSION_IDLE_SECS", DEFAULT_SESSION_IDLE_SECS));
        cfg.anonymous_idle = Duration::from_secs(parse_env("PORTAL_ANON_IDLE_SECS", DEFAULT_ANON_IDLE_SECS));
        cfg.max_anonymous_sessions = parse_env("PORTAL_MAX_ANON_SESSIONS", DEFAULT_MAX_ANON_SESSIONS);
        let port: u16 = parse_env("PORTAL_HTTP_PORT", DEFAULT_HTTP_PORT);
        let ip: IpAddr = parse_env("PORTAL_BIND", IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        cfg.bind = SocketAddr::new(ip, port);
        cfg.cookie_secure = env::var("PORTAL_COOKIE_SECURE").ok().and_then(|v| parse_bool(&v)).unwrap_or(true);
        cfg.operator_token = env::var("PORTAL_OPERATOR_TOKEN").ok().filter(|s| !s.trim().is_empty());
        Ok(cfg)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(v) => match v.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(target: "startup", "ignoring invalid {}='{}', using default", name, v);
                default
            }
        },
        Err(_) => default,
    }
}

pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sheet_url_into_id() {
        let loc = RosterLocation::parse(
            "https://docs.google.com/spreadsheets/d/abc123XYZ/edit#gid=0",
            None,
        ).unwrap();
        assert_eq!(loc, RosterLocation::Sheet { id: "abc123XYZ".into(), worksheet: None });
    }

    #[test]
    fn parses_bare_id_and_paths() {
        assert_eq!(
            RosterLocation::parse("  abc123 ", Some("Padron".into())).unwrap(),
            RosterLocation::Sheet { id: "abc123".into(), worksheet: Some("Padron".into()) }
        );
        assert_eq!(RosterLocation::parse("file:roster.txt", None).unwrap(), RosterLocation::File("roster.txt".into()));
        assert_eq!(RosterLocation::parse("data/roster.csv", None).unwrap(), RosterLocation::File("data/roster.csv".into()));
        assert_eq!(RosterLocation::parse("ROSTER.CSV", None).unwrap(), RosterLocation::File("ROSTER.CSV".into()));
        assert_eq!(
            RosterLocation::parse("https://example.org/roster.csv", None).unwrap(),
            RosterLocation::Url("https://example.org/roster.csv".into())
        );
        assert!(RosterLocation::parse("   ", None).is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PortalConfig::with_roster(RosterLocation::Url("https://example.org/x.csv".into()));
        assert_eq!(cfg.roster_ttl, Duration::from_secs(600));
        assert_eq!(cfg.max_code_chars, 11);
        assert!(cfg.anonymous_idle < cfg.session_idle);
        assert_eq!(cfg.max_anonymous_sessions, 10_000);
        assert!(cfg.cookie_secure);
        assert!(cfg.operator_token.is_none());
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
