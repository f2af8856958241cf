use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use crate::auth::{AuthGate, Role};
use crate::config::Config;

/// Aggregation and control plane between the upstream book and operator
/// dashboards.
#[derive(Parser)]
#[command(name = "wagerdesk", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value = "8090")]
        port: u16,

        /// Directory for the sqlite database
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },

    /// Mint an operator bearer token (requires AUTH_SECRET)
    MintToken {
        /// Operator user id
        #[arg(long)]
        user: String,

        /// Display/user name recorded in audit entries
        #[arg(long)]
        username: Option<String>,

        /// viewer, agent, manager or admin
        #[arg(long, default_value = "viewer")]
        role: String,

        /// Restrict the token to one agent subtree
        #[arg(long)]
        agent_scope: Option<String>,

        /// Token lifetime in hours
        #[arg(long, default_value = "24")]
        ttl_hours: u64,
    },

    /// Make one authenticated upstream call and print the result
    CheckUpstream {
        /// Operation name, e.g. getPending
        #[arg(long, default_value = "getLiveActivity")]
        operation: String,

        /// Agent to query as
        #[arg(long)]
        agent: String,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve {
            host,
            port,
            data_dir,
        } => {
            let config = Config::from_env()?;
            init_tracing(&config.log_level);
            let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
            rt.block_on(crate::api::serve(config, &host, port, &data_dir))
        }

        Command::MintToken {
            user,
            username,
            role,
            agent_scope,
            ttl_hours,
        } => {
            let secret = std::env::var("AUTH_SECRET").context("AUTH_SECRET not set")?;
            let Some(role) = Role::parse(&role) else {
                bail!("invalid role '{role}'. Use viewer, agent, manager or admin.");
            };
            let gate = AuthGate::new(secret, Duration::from_secs(ttl_hours * 3600));
            let token = gate.mint(
                &user,
                username.as_deref().unwrap_or(&user),
                role,
                agent_scope,
                &HashSet::new(),
            )?;
            println!("{token}");
            Ok(())
        }

        Command::CheckUpstream { operation, agent } => {
            let config = Config::from_env()?;
            init_tracing(&config.log_level);
            let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
            rt.block_on(check_upstream(config, &operation, &agent))
        }
    }
}

async fn check_upstream(config: Config, operation: &str, agent: &str) -> Result<()> {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::cache::TtlCache;
    use crate::upstream::{CallOpts, UpstreamClient};

    let cache = Arc::new(TtlCache::new());
    let client = UpstreamClient::new(&config, cache.clone());

    let mut params = BTreeMap::new();
    params.insert("agentID".to_string(), agent.to_string());
    params.insert("agentOwner".to_string(), agent.to_string());

    match client.call(operation, &params, CallOpts::cached()).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Err(err) => {
            eprintln!("upstream error ({}): {err}", err.kind());
        }
    }

    let stats = client.stats();
    eprintln!(
        "requests: {}, failures: {}, cache: {:?}",
        stats.requests,
        stats.failures,
        cache.stats()
    );
    Ok(())
}

fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .try_init();
}
