use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tetra_mesh::TetraOptions;
use tetra_mesh::tetrahedralize::{DEFAULT_EDGE_LENGTH_FAC, DEFAULT_OPTIMIZE};
use thiserror::Error;

pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_EXPLODE_FACTOR: f64 = 1.0;
pub const DEFAULT_COMPUTE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_FRONTEND_DIR: &str = "frontend";
pub const DEFAULT_MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("pool size must be at least 1")]
    EmptyPool,

    #[error("edge length factor must be finite and positive, got {0}")]
    EdgeLengthFactor(f64),

    #[error("explode factor must lie within [0, 1], got {0}")]
    ExplodeFactor(f64),

    #[error("request body limit must be at least 1 byte")]
    EmptyBodyLimit,
}

/// Options of the `start` command. Every flag can also come from the
/// environment.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Interface to bind.
    #[arg(long, env = "TETRA_HOST", default_value_t = DEFAULT_HOST)]
    pub host: IpAddr,

    /// Port to bind.
    #[arg(long, env = "TETRA_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Restart the server when its executable changes (development only).
    #[arg(long, env = "TETRA_RELOAD")]
    pub reload: bool,

    /// Maximum number of concurrent meshing worker processes.
    #[arg(long, env = "TETRA_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// Target edge length relative to the input's bounding-box diagonal.
    #[arg(long, env = "TETRA_EDGE_LENGTH_FAC", default_value_t = DEFAULT_EDGE_LENGTH_FAC)]
    pub edge_length_fac: f64,

    /// Run the mesher's optimization pass.
    #[arg(
        long,
        env = "TETRA_OPTIMIZE",
        default_value_t = DEFAULT_OPTIMIZE,
        action = clap::ArgAction::Set
    )]
    pub optimize: bool,

    /// How far cells are pushed apart in the returned surface, 0 to 1.
    #[arg(long, env = "TETRA_EXPLODE_FACTOR", default_value_t = DEFAULT_EXPLODE_FACTOR)]
    pub explode_factor: f64,

    /// Seconds a request waits for its worker; 0 waits forever.
    #[arg(
        long,
        env = "TETRA_COMPUTE_TIMEOUT_SECS",
        default_value_t = DEFAULT_COMPUTE_TIMEOUT_SECS
    )]
    pub compute_timeout_secs: u64,

    /// Largest accepted mesh upload, in bytes.
    #[arg(long, env = "TETRA_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Directory holding the prebuilt UI (`index.html` and `_next/`).
    #[arg(long, env = "TETRA_FRONTEND_DIR", default_value = DEFAULT_FRONTEND_DIR)]
    pub frontend_dir: PathBuf,

    /// Serve the API only, without UI assets.
    #[arg(long, env = "TETRA_HEADLESS")]
    pub headless: bool,

    /// Log the duration of every request.
    #[arg(long, env = "TETRA_LOG_TIMING")]
    pub log_timing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
            reload: false,
            pool_size: DEFAULT_POOL_SIZE,
            edge_length_fac: DEFAULT_EDGE_LENGTH_FAC,
            optimize: DEFAULT_OPTIMIZE,
            explode_factor: DEFAULT_EXPLODE_FACTOR,
            compute_timeout_secs: DEFAULT_COMPUTE_TIMEOUT_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            frontend_dir: PathBuf::from(DEFAULT_FRONTEND_DIR),
            headless: false,
            log_timing: false,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::EmptyPool);
        }
        if !self.edge_length_fac.is_finite() || self.edge_length_fac <= 0.0 {
            return Err(ConfigError::EdgeLengthFactor(self.edge_length_fac));
        }
        if !(0.0..=1.0).contains(&self.explode_factor) {
            return Err(ConfigError::ExplodeFactor(self.explode_factor));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::EmptyBodyLimit);
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn tetra_options(&self) -> TetraOptions {
        TetraOptions {
            edge_length_fac: self.edge_length_fac,
            optimize: self.optimize,
        }
    }

    pub fn compute_timeout(&self) -> Option<Duration> {
        (self.compute_timeout_secs > 0).then(|| Duration::from_secs(self.compute_timeout_secs))
    }
}
