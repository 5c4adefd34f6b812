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

use clap::Parser;
use pcbook::config::Config;
use pcbook::observability::{metrics, tracing_setup};
use pcbook::server::{ConnectionManager, GrpcConnectionManager};
use std::net::SocketAddr;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "pcbook")]
#[command(about = "Laptop catalog gRPC server with token based access control", long_about = None)]
struct Args {
    /// Address to listen on (e.g., 0.0.0.0:8080)
    #[arg(short, long)]
    listen: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "pcbook.toml")]
    config: String,

    /// Serve every method without checking access tokens
    #[arg(long)]
    no_auth: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing with format from environment
    tracing_setup::init_from_env();

    let args = Args::parse();

    let mut cfg = if Path::new(&args.config).exists() {
        Config::from_path(&args.config)?
    } else {
        tracing::info!(path = %args.config, "config file not found, using defaults");
        Config::default()
    };

    // Command line args override config file
    if args.no_auth {
        cfg.auth.enabled = false;
    }
    let addr: SocketAddr = args.listen.as_ref().unwrap_or(&cfg.listen_addr).parse()?;

    let server = GrpcConnectionManager::from_config(&cfg)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;
    tracing::info!(
        %addr,
        auth = cfg.auth.enabled,
        images = %cfg.images.backend,
        "pcbook gRPC server listening"
    );

    if let Some(metrics_addr) = &cfg.metrics.listen_addr {
        let listener = tokio::net::TcpListener::bind(metrics_addr).await?;
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(listener).await {
                tracing::error!("metrics endpoint exited with error: {e}");
            }
        });
    }

    tokio::select! {
        r = server.serve(addr) => {
            if let Err(e) = r {
                tracing::error!("server exited with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("ctrl-c received, shutting down");
        }
    }

    Ok(())
}
