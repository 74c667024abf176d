use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use std::{env, fs};

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub rtsp: Rtsp,
    #[serde(default)]
    pub streams: HashMap<String, StreamConf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Control-connection timeouts, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rtsp {
    #[serde(default = "default_rtsp_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_rtsp_timeout")]
    pub write_timeout: u64,
}

impl Rtsp {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConf {
    pub url: String,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Rtsp {
    fn default() -> Self {
        Self {
            read_timeout: default_rtsp_timeout(),
            write_timeout: default_rtsp_timeout(),
        }
    }
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

fn default_rtsp_timeout() -> u64 {
    10
}

impl Config {
    pub fn parse(path: Option<String>) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path.unwrap_or_else(|| String::from("config.toml")))
            .unwrap_or_default();
        let cfg: Self = toml::from_str(raw.as_str())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.rtsp.read_timeout == 0 || self.rtsp.write_timeout == 0 {
            return Err(anyhow::anyhow!("rtsp timeouts cannot be 0"));
        }
        Ok(())
    }
}
