/*
 * config.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magma, a multi-protocol mail server.
 *
 * Magma is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magma is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magma.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Configuration: a flat keyed map loaded from one file, overridden by
//! repeated `-c key=value` arguments. Server instances are declared as
//! `server.<name>.<property>` key groups.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration error (unreadable file, malformed line, bad value).
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Protocol served by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolTag {
    Smtp,
    Submission,
    Pop,
    Imap,
    Dmtp,
    Molten,
    Http,
}

impl ProtocolTag {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "smtp" => Some(ProtocolTag::Smtp),
            "submission" => Some(ProtocolTag::Submission),
            "pop" | "pop3" => Some(ProtocolTag::Pop),
            "imap" => Some(ProtocolTag::Imap),
            "dmtp" => Some(ProtocolTag::Dmtp),
            "molten" => Some(ProtocolTag::Molten),
            "http" => Some(ProtocolTag::Http),
            _ => None,
        }
    }

    pub fn default_port(self, tls: bool) -> u16 {
        match (self, tls) {
            (ProtocolTag::Smtp, false) => 25,
            (ProtocolTag::Smtp, true) => 465,
            (ProtocolTag::Submission, _) => 587,
            (ProtocolTag::Pop, false) => 110,
            (ProtocolTag::Pop, true) => 995,
            (ProtocolTag::Imap, false) => 143,
            (ProtocolTag::Imap, true) => 993,
            (ProtocolTag::Dmtp, _) => 26,
            (ProtocolTag::Molten, _) => 6776,
            (ProtocolTag::Http, false) => 80,
            (ProtocolTag::Http, true) => 443,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProtocolTag::Smtp => "SMTP",
            ProtocolTag::Submission => "SUBMISSION",
            ProtocolTag::Pop => "POP",
            ProtocolTag::Imap => "IMAP",
            ProtocolTag::Dmtp => "DMTP",
            ProtocolTag::Molten => "MOLTEN",
            ProtocolTag::Http => "HTTP",
        }
    }
}

/// Per-listener violation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationPolicy {
    /// Combined spin + violation budget before the connection closes.
    pub cutoff: u32,
    /// Penalty delay applied after each protocol violation.
    pub delay: Duration,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        Self { cutoff: 10, delay: Duration::from_millis(100) }
    }
}

/// One configured listening endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub protocol: ProtocolTag,
    pub address: String,
    pub port: u16,
    pub tls: bool,
    pub certificate: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub timeout: Duration,
    pub violations: ViolationPolicy,
}

/// The flat configuration map.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key = value` lines. `#` starts a comment; blank lines are
    /// ignored.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::new(format!(
                    "line {}: expected key = value, got {:?}",
                    lineno + 1,
                    line
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::new(format!("line {}: empty key", lineno + 1)));
            }
            values.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { values })
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::new(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Apply one `-c key=value` override.
    pub fn apply_override(&mut self, pair: &str) -> Result<(), ConfigError> {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(ConfigError::new(format!("override {:?} is not key=value", pair)));
        };
        self.values.insert(key.trim().to_string(), value.trim().to_string());
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
    }

    pub fn get_u16(&self, key: &str, default: u16) -> u16 {
        self.get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }

    pub fn get_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// The active configuration, one `key = value` per line (the `-d`
    /// dump format).
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.values {
            let _ = writeln!(out, "{} = {}", key, value);
        }
        out
    }

    /// Extract the `server.<name>.*` key groups into listener specs.
    pub fn servers(&self) -> Result<Vec<ServerSpec>, ConfigError> {
        let mut names: Vec<String> = Vec::new();
        for key in self.values.keys() {
            if let Some(rest) = key.strip_prefix("server.") {
                if let Some((name, _)) = rest.split_once('.') {
                    if !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
            }
        }

        let mut specs = Vec::with_capacity(names.len());
        for name in names {
            let prefix = format!("server.{}.", name);
            let protocol_value = self
                .get(&format!("{}protocol", prefix))
                .ok_or_else(|| ConfigError::new(format!("server {} has no protocol", name)))?;
            let protocol = ProtocolTag::parse(protocol_value).ok_or_else(|| {
                ConfigError::new(format!("server {}: unknown protocol {:?}", name, protocol_value))
            })?;
            let tls = self.get_bool(&format!("{}tls", prefix), false);
            if protocol == ProtocolTag::Dmtp && !tls {
                return Err(ConfigError::new(format!("server {}: DMTP requires TLS", name)));
            }
            let port = self.get_u16(&format!("{}port", prefix), protocol.default_port(tls));
            let certificate = self.get(&format!("{}certificate", prefix)).map(PathBuf::from);
            let key = self.get(&format!("{}key", prefix)).map(PathBuf::from);
            if tls && (certificate.is_none() || key.is_none()) {
                return Err(ConfigError::new(format!(
                    "server {}: TLS requires certificate and key paths",
                    name
                )));
            }
            specs.push(ServerSpec {
                name: name.clone(),
                protocol,
                address: self.get_or(&format!("{}address", prefix), "0.0.0.0").to_string(),
                port,
                tls,
                certificate,
                key,
                timeout: self.get_secs(&format!("{}timeout", prefix), Duration::from_secs(600)),
                violations: ViolationPolicy {
                    cutoff: self.get_u64(&format!("{}violations.cutoff", prefix), 10) as u32,
                    delay: Duration::from_millis(
                        self.get_u64(&format!("{}violations.delay", prefix), 100),
                    ),
                },
            });
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# listeners
server.pop1.protocol = pop
server.pop1.port = 8110
server.pop1.violations.cutoff = 3
server.imap1.protocol = imap

magma.storage.root = /var/spool/magma
magma.storage.active = local
";

    #[test]
    fn parse_and_lookup() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.get("magma.storage.root"), Some("/var/spool/magma"));
        assert_eq!(config.get_u16("server.pop1.port", 110), 8110);
        assert_eq!(config.get_u64("missing", 7), 7);
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.apply_override("magma.storage.active = other").unwrap();
        assert_eq!(config.get("magma.storage.active"), Some("other"));
        assert!(config.apply_override("no-equals").is_err());
    }

    #[test]
    fn server_specs_extracted_with_defaults() {
        let config = Config::parse(SAMPLE).unwrap();
        let servers = config.servers().unwrap();
        assert_eq!(servers.len(), 2);

        let pop = servers.iter().find(|s| s.name == "pop1").unwrap();
        assert_eq!(pop.protocol, ProtocolTag::Pop);
        assert_eq!(pop.port, 8110);
        assert_eq!(pop.violations.cutoff, 3);

        let imap = servers.iter().find(|s| s.name == "imap1").unwrap();
        assert_eq!(imap.port, 143);
        assert_eq!(imap.timeout, Duration::from_secs(600));
    }

    #[test]
    fn dmtp_without_tls_rejected() {
        let config = Config::parse("server.d.protocol = dmtp\n").unwrap();
        assert!(config.servers().is_err());
    }

    #[test]
    fn malformed_lines_rejected() {
        assert!(Config::parse("just a line\n").is_err());
        assert!(Config::parse("= value\n").is_err());
    }

    #[test]
    fn dump_round_trips() {
        let config = Config::parse(SAMPLE).unwrap();
        let dumped = config.dump();
        let reparsed = Config::parse(&dumped).unwrap();
        assert_eq!(reparsed.get("server.pop1.port"), Some("8110"));
    }
}
