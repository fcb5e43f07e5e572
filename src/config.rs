//! Server configuration
//!
//! Loaded from a JSON file:
//!
//! ```json
//! {
//!   "rtmp_addr": ":1935",
//!   "server": [
//!     { "appname": "live", "live": true, "hls": true, "static_push": [] }
//!   ]
//! }
//! ```
//!
//! Empty listen addresses disable the corresponding surface.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// One application block
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Application {
    pub appname: String,
    /// RTMP ingest/playback enabled
    pub live: bool,
    /// HLS segmenting enabled
    pub hls: bool,
    /// FLV recording enabled (needs `flv_dir`)
    pub flv: bool,
    /// Control API enabled
    pub api: bool,
    pub static_push: Vec<String>,
}

impl Default for Application {
    fn default() -> Self {
        Self {
            appname: "live".to_string(),
            live: true,
            hls: true,
            flv: false,
            api: true,
            static_push: Vec::new(),
        }
    }
}

/// JWT verification parameters for the control API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: String,
}

/// Whole-server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rtmp_addr: String,
    pub httpflv_addr: String,
    pub hls_addr: String,
    pub api_addr: String,
    /// Retained GOPs per channel
    pub gop_num: usize,
    /// Keep HLS segments queryable after the publisher disconnects
    pub hls_keep_after_end: bool,
    /// FLV recording root; empty disables
    pub flv_dir: String,
    /// Channel-key persistence file; empty disables persistence
    pub key_file: String,
    pub jwt: JwtConfig,
    pub server: Vec<Application>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rtmp_addr: ":1935".to_string(),
            httpflv_addr: ":7001".to_string(),
            hls_addr: ":7002".to_string(),
            api_addr: ":8090".to_string(),
            gop_num: 1,
            hls_keep_after_end: false,
            flv_dir: String::new(),
            key_file: String::new(),
            jwt: JwtConfig::default(),
            server: vec![Application::default()],
        }
    }
}

impl Config {
    /// Load a JSON config file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read(path.as_ref()).await?;
        let config: Config = serde_json::from_slice(&raw).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        Ok(config)
    }

    /// Is `app` configured and live
    pub fn check_app_name(&self, app: &str) -> bool {
        self.server.iter().any(|a| a.appname == app && a.live)
    }

    pub fn app(&self, name: &str) -> Option<&Application> {
        self.server.iter().find(|a| a.appname == name)
    }

    /// Per-app static push configuration, for the push registry
    pub fn static_push_map(&self) -> HashMap<String, Vec<String>> {
        self.server
            .iter()
            .filter(|a| a.live && !a.static_push.is_empty())
            .map(|a| (a.appname.clone(), a.static_push.clone()))
            .collect()
    }

    /// Normalize `:port` into a bindable address
    pub fn bind_addr(addr: &str) -> String {
        if addr.starts_with(':') {
            format!("0.0.0.0{}", addr)
        } else {
            addr.to_string()
        }
    }
}
