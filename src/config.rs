// src/config.rs

//! Manages gateway configuration: loading, defaults and validation.

use crate::connection::{
    ConnectionOptions, DEFAULT_CHECK_INTERVAL, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_LINE_LENGTH,
    Framing,
};
use crate::core::protocol::{
    CommandCodes, StatusCodes, default_closed_status, default_open_status,
};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

/// Per-connection tunables applied to every accepted device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// A device silent for longer than this is disconnected.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// How often each connection checks for idleness.
    #[serde(default = "default_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,
    /// The prompt sent right after accepting a device. Empty disables it.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default)]
    pub framing: Framing,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            check_interval: default_check_interval(),
            greeting: default_greeting(),
            framing: Framing::default(),
            max_line_length: default_max_line_length(),
        }
    }
}

fn default_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}
fn default_check_interval() -> Duration {
    DEFAULT_CHECK_INTERVAL
}
fn default_greeting() -> String {
    "please input your deviceId:".to_string()
}
fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

/// The device-side vocabulary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    /// Status codes meaning the lock is open.
    #[serde(default = "default_open_status")]
    pub open_status: Vec<String>,
    /// Status codes meaning the lock is closed.
    #[serde(default = "default_closed_status")]
    pub closed_status: Vec<String>,
    /// Keepalive code, logged and otherwise ignored.
    #[serde(default = "default_heartbeat")]
    pub heartbeat: String,
    /// Lines with which a device asks to be disconnected.
    #[serde(default = "default_quit")]
    pub quit: Vec<String>,
}

impl ProtocolConfig {
    pub fn status_codes(&self) -> StatusCodes {
        StatusCodes::new(self.open_status.clone(), self.closed_status.clone())
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            open_status: default_open_status(),
            closed_status: default_closed_status(),
            heartbeat: default_heartbeat(),
            quit: default_quit(),
        }
    }
}

fn default_heartbeat() -> String {
    "0100".to_string()
}
fn default_quit() -> Vec<String> {
    vec!["q".to_string(), "exit".to_string()]
}

/// Configuration for the monitor HTTP server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// If true, the HTTP server for device listing, commands and metrics is started.
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_monitor_port")]
    pub port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitor_enabled(),
            host: default_host(),
            port: default_monitor_port(),
        }
    }
}

fn default_monitor_enabled() -> bool {
    true
}
fn default_monitor_port() -> u16 {
    8080
}

/// The complete, validated gateway configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub commands: CommandCodes,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            connection: ConnectionConfig::default(),
            protocol: ProtocolConfig::default(),
            commands: CommandCodes::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the per-connection options without any hooks attached.
    pub fn connection_options(&self) -> ConnectionOptions {
        let mut options = ConnectionOptions::default()
            .with_idle_timeout(self.connection.idle_timeout)
            .with_check_interval(self.connection.check_interval)
            .with_status_codes(self.protocol.status_codes())
            .with_framing(self.connection.framing, self.connection.max_line_length);
        if !self.connection.greeting.is_empty() {
            options = options.with_greeting(self.connection.greeting.clone());
        }
        options
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.connection.idle_timeout.is_zero() {
            return Err(anyhow!("connection.idle_timeout must be greater than 0"));
        }
        if self.connection.check_interval.is_zero() {
            return Err(anyhow!("connection.check_interval must be greater than 0"));
        }
        if self.connection.max_line_length == 0 {
            return Err(anyhow!("connection.max_line_length must be greater than 0"));
        }

        let open: HashSet<&str> = self.protocol.open_status.iter().map(String::as_str).collect();
        let closed: HashSet<&str> = self
            .protocol
            .closed_status
            .iter()
            .map(String::as_str)
            .collect();
        if open.is_empty() || closed.is_empty() {
            return Err(anyhow!(
                "protocol.open_status and protocol.closed_status must not be empty"
            ));
        }
        if let Some(code) = open.intersection(&closed).next() {
            return Err(anyhow!(
                "status code '{}' cannot mean both open and closed",
                code
            ));
        }

        let commands = [
            &self.commands.open,
            &self.commands.close,
            &self.commands.query,
        ];
        if commands.iter().any(|c| c.is_empty()) {
            return Err(anyhow!("command codes cannot be empty"));
        }
        let distinct: HashSet<&String> = commands.iter().copied().collect();
        if distinct.len() != commands.len() {
            return Err(anyhow!("commands.open, commands.close and commands.query must differ"));
        }

        if self.monitor.enabled {
            if self.monitor.port == 0 {
                return Err(anyhow!("monitor.port cannot be 0"));
            }
            if self.monitor.port == self.port {
                return Err(anyhow!(
                    "monitor.port cannot be the same as the device server port"
                ));
            }
        }
        Ok(())
    }
}
