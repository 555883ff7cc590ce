use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use quorum_lite::config::{NodeConfig, OpPolicy, PeerConfig};
use quorum_lite::node::Node;
use quorum_lite::proto::command_service_client::CommandServiceClient;
use quorum_lite::proto::{ArgPair, ClientCommandRequest, GetStatusRequest};
use quorum_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "quorum-lite")]
#[command(version)]
#[command(about = "Raft consensus and command admission over a replicated log")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a quorum-lite server node
    Server(ServerArgs),

    /// Submit a client command to a node
    Command {
        #[command(flatten)]
        client: ClientArgs,

        /// Command name (e.g. "create-topic")
        name: String,

        /// Command arguments as key=value pairs
        args: Vec<String>,

        /// Time to wait for the command to commit (0 uses the node default)
        #[arg(long, default_value = "0")]
        timeout_ms: u64,
    },

    /// Show a node's Raft status
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Node ID (unique identifier for this node)
    #[arg(long, default_value = "1")]
    node_id: u64,

    /// Port to listen on for gRPC
    #[arg(long, default_value = "50051")]
    port: u16,

    /// Peer addresses (comma-separated, format: "id:host:port")
    /// Example: "2:127.0.0.1:50052,3:127.0.0.1:50053"
    #[arg(long, default_value = "")]
    peers: String,

    /// Lower bound of the randomized election timeout
    #[arg(long, default_value = "150")]
    election_timeout_min_ms: u64,

    /// Upper bound of the randomized election timeout
    #[arg(long, default_value = "300")]
    election_timeout_max_ms: u64,

    /// Idle interval between heartbeats to each peer
    #[arg(long, default_value = "50")]
    heartbeat_interval_ms: u64,

    /// Let followers answer read commands
    #[arg(long)]
    follower_reads: bool,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct CommandOutput {
    ok: bool,
    message: String,
}

#[derive(Serialize)]
struct StatusOutput {
    node_id: u64,
    role: String,
    term: u64,
    leader_id: Option<u64>,
    last_log_index: u64,
    commit_index: u64,
    active_replicators: u64,
    pending_commands: u64,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_peers(peers_str: &str) -> Vec<PeerConfig> {
    if peers_str.is_empty() {
        return Vec::new();
    }

    peers_str
        .split(',')
        .filter_map(|peer| {
            let parts: Vec<&str> = peer.trim().split(':').collect();
            if parts.len() == 3 {
                let node_id: u64 = parts[0].parse().ok()?;
                let addr = format!("{}:{}", parts[1], parts[2]);
                Some(PeerConfig { node_id, addr })
            } else {
                tracing::warn!(peer, "Invalid peer format, expected id:host:port");
                None
            }
        })
        .collect()
}

fn parse_args(args: &[String]) -> Result<Vec<ArgPair>, Box<dyn std::error::Error>> {
    args.iter()
        .map(|raw| match raw.split_once('=') {
            Some((arg, param)) => Ok(ArgPair {
                arg: arg.to_string(),
                param: param.to_string(),
            }),
            None => Err(format!("invalid argument '{}', expected key=value", raw).into()),
        })
        .collect()
}

async fn connect(args: &ClientArgs) -> Result<CommandServiceClient<Channel>, Box<dyn std::error::Error>> {
    let channel = Channel::from_shared(args.addr.clone())?.connect().await?;
    Ok(CommandServiceClient::new(channel))
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let op_policy = if args.follower_reads {
        OpPolicy::default().with_follower_reads()
    } else {
        OpPolicy::default()
    };

    let config = NodeConfig {
        node_id: args.node_id,
        listen_addr,
        peers: parse_peers(&args.peers),
        election_timeout_min_ms: args.election_timeout_min_ms,
        election_timeout_max_ms: args.election_timeout_max_ms,
        heartbeat_interval_ms: args.heartbeat_interval_ms,
        op_policy,
        ..NodeConfig::default()
    };

    tracing::info!(
        node_id = config.node_id,
        listen_addr = %config.listen_addr,
        peers = ?config.peers.iter().map(|p| format!("{}:{}", p.node_id, p.addr)).collect::<Vec<_>>(),
        follower_reads = args.follower_reads,
        "Starting quorum-lite node"
    );

    let shutdown = install_shutdown_handler();
    let (node, events) = Node::new(config);
    node.run(events, shutdown).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_command(
    client_args: &ClientArgs,
    name: String,
    args: Vec<String>,
    timeout_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args(&args)?;
    let mut client = connect(client_args).await?;
    let resp = client
        .client_command(ClientCommandRequest {
            command: name,
            args,
            timeout_ms,
        })
        .await?
        .into_inner();

    match client_args.output {
        OutputFormat::Json => {
            let output = CommandOutput {
                ok: resp.ok,
                message: resp.message.clone(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            let outcome = if resp.ok { "OK" } else { "ERROR" };
            println!("{:<8} {}", outcome, resp.message);
        }
    }

    if !resp.ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_status(client_args: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(client_args).await?;
    let resp = client.get_status(GetStatusRequest {}).await?.into_inner();
    let leader_id = (resp.leader_id != 0).then_some(resp.leader_id);

    match client_args.output {
        OutputFormat::Json => {
            let output = StatusOutput {
                node_id: resp.node_id,
                role: resp.role,
                term: resp.term,
                leader_id,
                last_log_index: resp.last_log_index,
                commit_index: resp.commit_index,
                active_replicators: resp.active_replicators,
                pending_commands: resp.pending_commands,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            let leader = leader_id.map_or_else(|| "-".to_string(), |id| id.to_string());
            println!("Node:              {}", resp.node_id);
            println!("Role:              {}", resp.role);
            println!("Term:              {}", resp.term);
            println!("Leader:            {}", leader);
            println!("Last log index:    {}", resp.last_log_index);
            println!("Commit index:      {}", resp.commit_index);
            println!("Replicators:       {}", resp.active_replicators);
            println!("Pending commands:  {}", resp.pending_commands);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Command {
            client,
            name,
            args,
            timeout_ms,
        } => handle_command(&client, name, args, timeout_ms).await,
        Commands::Status { client } => handle_status(&client).await,
    }
}
