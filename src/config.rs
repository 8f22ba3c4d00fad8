use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind};
use std::str::FromStr;
use std::time::Duration;

/// Timeout applied when a profile or caller does not give one (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Supported file transfer protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain FTP (default port 21)
    Ftp,
    /// SSH File Transfer Protocol (default port 22)
    Sftp,
}

impl Protocol {
    /// Well-known port used when none is given explicitly
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ftp => 21,
            Protocol::Sftp => 22,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ftp => f.write_str("FTP"),
            Protocol::Sftp => f.write_str("SFTP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "sftp" => Ok(Protocol::Sftp),
            other => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("unknown protocol '{}', expected 'ftp' or 'sftp'", other),
            )),
        }
    }
}

/// Path style of the remote host, selects the separator used when joining
/// remote path segments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsStyle {
    #[default]
    #[serde(rename = "unix")]
    Unix,
    #[serde(rename = "win", alias = "windows")]
    Windows,
}

impl OsStyle {
    pub fn separator(self) -> char {
        match self {
            OsStyle::Unix => '/',
            OsStyle::Windows => '\\',
        }
    }
}

impl FromStr for OsStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unix" => Ok(OsStyle::Unix),
            "win" | "windows" => Ok(OsStyle::Windows),
            other => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("unknown OS style '{}', expected 'unix' or 'win'", other),
            )),
        }
    }
}

/// Connection profile for a single remote host
///
/// Credentials are not part of a profile; they are handed to
/// `Session::connection` at login time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Transfer protocol (JSON field: protocol, "ftp" or "sftp")
    pub protocol: Protocol,
    /// Remote hostname or IP address (JSON field: host)
    pub host: String,
    /// Remote path style (JSON field: os, "unix" or "win", default "unix")
    #[serde(default)]
    pub os: OsStyle,
    /// Explicit port; protocol default when absent (JSON field: port)
    #[serde(default)]
    pub port: Option<u16>,
    /// Network timeout in seconds (JSON field: timeout)
    #[serde(default, rename = "timeout")]
    pub timeout_secs: Option<u64>,
}

impl SessionConfig {
    pub fn new(protocol: Protocol, host: &str) -> Self {
        SessionConfig {
            protocol,
            host: host.to_string(),
            os: OsStyle::default(),
            port: None,
            timeout_secs: None,
        }
    }

    /// Effective port: the explicit one or the protocol's default
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// Effective timeout for connect, handshake and every blocking call
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Checks the profile for values no connection could work with
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.trim().is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "host must not be empty"));
        }
        if self.port == Some(0) {
            return Err(Error::new(ErrorKind::InvalidInput, "port must be non-zero"));
        }
        if self.timeout_secs == Some(0) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "timeout must be a positive number of seconds",
            ));
        }
        Ok(())
    }
}

/// Parses a connection profile file into a vector of SessionConfig structs
///
/// # Arguments
/// * `filename` - Path to profile file
///
/// # Errors
/// - File not found or unreadable
/// - Invalid JSON format or unknown protocol/OS style
/// - Profile failing `SessionConfig::validate`
///
/// # File Format
/// JSONL format - one JSON object per line with fields:
/// protocol, host, and optionally os, port, timeout.
/// Empty lines and lines starting with `#` are skipped.
///
/// # Example
/// ```text
/// // let profiles = parse_config("hosts.jsonl")?;
/// ```
pub fn parse_config(filename: &str) -> Result<Vec<SessionConfig>, Error> {
    let file = File::open(filename)?;
    let reader = BufReader::new(file);

    let mut configs = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let config: SessionConfig = serde_json::from_str(line).map_err(|e| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("invalid JSON on line {}: {}", line_num + 1, e),
            )
        })?;

        config.validate().map_err(|e| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("invalid profile on line {}: {}", line_num + 1, e),
            )
        })?;

        configs.push(config);
    }

    Ok(configs)
}
