use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use swift_cluster::config::ClusterConfig;
use swift_cluster::kv::MemoryKv;
use swift_cluster::net::local_member_ip;
use swift_cluster::shutdown::shutdown_signal;
use swift_cluster::{Cluster, MemberRole, SwiftError};

#[derive(Parser, Debug)]
#[command(name = "swift-cluster")]
#[command(about = "Cluster membership and job scheduling over a shared KV store")]
struct Args {
    /// Cluster name; all KV keys live under Swift/<name>/
    #[arg(long, default_value = "default")]
    cluster: String,

    /// Role of this member
    #[arg(long, value_parser = parse_role, default_value = "manager")]
    role: MemberRole,

    /// Member id (defaults to the local IPv4 address)
    #[arg(long)]
    member_id: Option<String>,

    /// Directory holding job packages (Manager only)
    #[arg(long, default_value = "Jobs")]
    jobs_dir: String,
}

fn parse_role(raw: &str) -> Result<MemberRole, String> {
    match raw.to_ascii_lowercase().as_str() {
        "manager" => Ok(MemberRole::Manager),
        "worker" => Ok(MemberRole::Worker),
        other => Err(format!("unknown role '{other}', expected manager or worker")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let member_id = match args.member_id {
        Some(id) => id,
        None => local_member_ip()?.to_string(),
    };

    tracing::info!(
        cluster = %args.cluster,
        member_id = %member_id,
        role = %args.role,
        "Starting cluster member"
    );

    // The demo runs against the in-process KV; production embeds the
    // library with a client for the real store.
    let kv = Arc::new(MemoryKv::new());
    let config = ClusterConfig::new(&args.cluster, &member_id, args.role)
        .with_jobs_dir(&args.jobs_dir);
    let cluster = Cluster::new(config, kv);

    match cluster.init().await {
        Ok(member) => {
            tracing::info!(member_id = %member.id, role = %member.role, "Joined cluster");
        }
        Err(SwiftError::ManagerTaken(other)) => {
            tracing::error!(other_manager = %other, "Manager role already taken");
            return Err(SwiftError::ManagerTaken(other).into());
        }
        Err(err) => return Err(err.into()),
    }

    cluster.start_monitor();

    shutdown_signal().await?;
    cluster.shutdown();
    Ok(())
}
