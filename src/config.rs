// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_SECRET_KEY: &str = "secret";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// gRPC listen address, e.g. "0.0.0.0:8080"
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub images: ImagesConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            auth: AuthConfig::default(),
            images: ImagesConfig::default(),
            upload: UploadConfig::default(),
            server: ServerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// When false every method is public and no token is checked
    #[serde(default = "default_auth_enabled")]
    pub enabled: bool,
    /// HMAC secret used to sign access tokens
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    /// Lifetime of an issued access token
    #[serde(default = "default_token_duration_secs")]
    pub token_duration_secs: u64,
    /// bcrypt cost used when hashing seeded passwords
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    /// Users created at startup
    #[serde(default = "default_users")]
    pub users: Vec<UserSeed>,
}

impl AuthConfig {
    pub fn token_duration(&self) -> Duration {
        Duration::from_secs(self.token_duration_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: default_auth_enabled(),
            secret_key: default_secret_key(),
            token_duration_secs: default_token_duration_secs(),
            bcrypt_cost: default_bcrypt_cost(),
            users: default_users(),
        }
    }
}

fn default_auth_enabled() -> bool {
    true
}

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

fn default_token_duration_secs() -> u64 {
    15 * 60
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UserSeed {
    pub username: String,
    pub password: String,
    pub role: String,
}

fn default_users() -> Vec<UserSeed> {
    vec![
        UserSeed {
            username: "admin".to_string(),
            password: "secret".to_string(),
            role: "admin".to_string(),
        },
        UserSeed {
            username: "user".to_string(),
            password: "secret".to_string(),
            role: "user".to_string(),
        },
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfig {
    /// backend can be "in-memory" or "disk"
    #[serde(default = "default_images_backend")]
    pub backend: String,
    /// folder for the disk backend
    #[serde(default = "default_images_folder")]
    pub folder: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            backend: default_images_backend(),
            folder: default_images_folder(),
        }
    }
}

fn default_images_backend() -> String {
    "disk".to_string()
}

fn default_images_folder() -> String {
    "img".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted image in bytes
    #[serde(default = "default_max_image_size")]
    pub max_image_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_image_size: default_max_image_size(),
        }
    }
}

fn default_max_image_size() -> usize {
    crate::service::DEFAULT_MAX_IMAGE_SIZE
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Responses buffered per server stream before the sender waits
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_stream_buffer() -> usize {
    crate::service::DEFAULT_STREAM_BUFFER
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Address serving `GET /metrics`; unset disables the endpoint
    #[serde(default)]
    pub listen_addr: Option<String>,
}

impl Config {
    pub fn from_path(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let cfg: Config = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        match self.images.backend.as_str() {
            "in-memory" | "disk" => {}
            other => return Err(format!("unknown images.backend {other:?}").into()),
        }
        if self.auth.enabled && self.auth.secret_key.is_empty() {
            return Err("auth.secret_key must not be empty".into());
        }
        if self.auth.token_duration_secs == 0 {
            return Err("auth.token_duration_secs must be positive".into());
        }
        if self.auth.secret_key == DEFAULT_SECRET_KEY && self.auth.enabled {
            tracing::warn!("auth.secret_key is the built-in default; set a real secret");
        }
        Ok(())
    }
}
