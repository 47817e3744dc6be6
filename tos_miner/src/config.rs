// Copyright (c) 2025 TOS Miner Developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use std::fs;

use serde::Deserialize;

/// One configured pool. The first entry is the primary, the rest are
/// failovers.
#[derive(Debug, Deserialize, Clone)]
pub struct PoolCfg {
    /// stratum+tcp://host:port or stratum+ssl://host:port
    pub url: String,

    /// Usually wallet.worker
    #[serde(default)]
    pub user: String,

    #[serde(default = "default_pool_pass")]
    pub pass: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Cfg {
    #[serde(default)]
    pub pools: Vec<PoolCfg>,

    /// Protocol variant: stratum, ethproxy, ethereumstratum, stratumv2
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Verify pool TLS certificates (pools often run self-signed)
    #[serde(default)]
    pub tls_strict: bool,

    #[serde(default = "default_cpu_enabled")]
    pub cpu_enabled: bool,

    /// 0 = one worker per hardware thread
    #[serde(default)]
    pub cpu_threads: usize,

    #[serde(default)]
    pub cuda_enabled: bool,

    #[serde(default)]
    pub opencl_enabled: bool,

    /// Base reconnect delay in seconds (exponential backoff on top)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,

    #[serde(default = "default_console_log_level")]
    pub console_log_level: String,

    #[serde(default = "default_logfile_log_level")]
    pub logfile_log_level: String,

    #[serde(default = "default_logfile_max_count")]
    pub logfile_max_count: u32,

    #[serde(default = "default_logfile_max_size")]
    pub logfile_max_size: u64,

    #[serde(default = "default_console_log_pattern")]
    pub console_log_pattern: String,

    #[serde(default = "default_logfile_log_pattern")]
    pub logfile_log_pattern: String,
}

fn default_pool_pass() -> String {
    "x".to_owned()
}

fn default_protocol() -> String {
    "stratum".to_owned()
}

fn default_cpu_enabled() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_console_log_level() -> String {
    "Info".to_owned()
}

fn default_logfile_log_level() -> String {
    "Warn".to_owned()
}

fn default_logfile_max_count() -> u32 {
    10
}

fn default_logfile_max_size() -> u64 {
    20
}

fn default_console_log_pattern() -> String {
    "{({d(%H:%M:%S)} [{l}]):16.16} {m}{n}".to_owned()
}

fn default_logfile_log_pattern() -> String {
    "{({d(%Y-%m-%d %H:%M:%S)} [{l}]):26.26} {m}{n}".to_owned()
}

/// Load and validate the configuration. Configuration errors are fatal at
/// startup.
pub fn load_cfg(config: &str) -> Cfg {
    let cfg_str = fs::read_to_string(config).unwrap_or_else(|e| {
        eprintln!("Failed to open config file '{}': {}", config, e);
        std::process::exit(1);
    });

    let cfg: Cfg = serde_yaml::from_str(&cfg_str).unwrap_or_else(|e| {
        eprintln!("Failed to parse config file '{}': {}", config, e);
        std::process::exit(1);
    });

    if let Err(e) = validate_cfg(&cfg) {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    cfg
}

/// Check constraints a usable configuration must satisfy.
pub fn validate_cfg(cfg: &Cfg) -> Result<(), String> {
    if cfg.pools.is_empty() {
        return Err("at least one pool must be configured".to_owned());
    }
    for pool in &cfg.pools {
        tos_stratum::parse_pool_url(&pool.url).map_err(|e| e.to_string())?;
        if pool.user.is_empty() {
            return Err(format!("[{}] user cannot be empty", pool.url));
        }
    }
    if !cfg.cpu_enabled && !cfg.cuda_enabled && !cfg.opencl_enabled {
        return Err("all device backends are disabled".to_owned());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Cfg {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_minimal_config() {
        let cfg = parse(
            r#"
pools:
  - url: "stratum+tcp://pool.example.com:3333"
    user: "wallet.rig"
"#,
        );
        assert_eq!(cfg.pools.len(), 1);
        assert_eq!(cfg.pools[0].pass, "x");
        assert_eq!(cfg.protocol, "stratum");
        assert!(cfg.cpu_enabled);
        assert_eq!(cfg.cpu_threads, 0);
        assert_eq!(cfg.reconnect_delay, 5);
        assert!(!cfg.tls_strict);
        assert!(validate_cfg(&cfg).is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_pools() {
        let cfg = parse("pools: []");
        assert!(validate_cfg(&cfg).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_url() {
        let cfg = parse(
            r#"
pools:
  - url: "http://pool.example.com:3333"
    user: "w"
"#,
        );
        assert!(validate_cfg(&cfg).is_err());
    }

    #[test]
    fn test_validation_rejects_missing_user() {
        let cfg = parse(
            r#"
pools:
  - url: "stratum+tcp://pool.example.com:3333"
"#,
        );
        assert!(validate_cfg(&cfg).is_err());
    }

    #[test]
    fn test_validation_rejects_no_devices() {
        let cfg = parse(
            r#"
pools:
  - url: "stratum+tcp://pool.example.com:3333"
    user: "w"
cpu_enabled: false
"#,
        );
        assert!(validate_cfg(&cfg).is_err());
    }

    #[test]
    fn test_failover_pools_and_overrides() {
        let cfg = parse(
            r#"
pools:
  - url: "stratum+tcp://primary.example.com:3333"
    user: "wallet.rig"
  - url: "stratum+ssl://backup.example.com:443"
    user: "wallet.rig"
    pass: "secret"
protocol: "ethproxy"
tls_strict: true
cpu_threads: 4
reconnect_delay: 2
"#,
        );
        assert_eq!(cfg.pools.len(), 2);
        assert_eq!(cfg.pools[1].pass, "secret");
        assert_eq!(cfg.protocol, "ethproxy");
        assert!(cfg.tls_strict);
        assert_eq!(cfg.cpu_threads, 4);
        assert_eq!(cfg.reconnect_delay, 2);
    }
}
