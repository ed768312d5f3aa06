//! QuorumCtl - Command line tool for a running WolfQuorum daemon
//!
//! Usage:
//!   quorumctl status            - Show votes and quorum as seen by this node
//!   quorumctl expected <N>      - Set cluster-wide expected votes
//!   quorumctl votes <NODE> <N>  - Change a node's votes
//!   quorumctl leave             - Announce a voluntary leave
//!   quorumctl qdevice ...       - Manage the quorum device
//!   quorumctl watch             - Follow quorum changes

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use wolfquorum::config::WolfQuorumConfig;
use wolfquorum::network::IpcClient;
use wolfquorum::protocol::{Notification, Request, Response, TRACK_CHANGES};
use wolfquorum::state::LOCAL_NODE_ID;

/// WolfQuorum Control Tool
#[derive(Parser)]
#[command(name = "quorumctl")]
#[command(about = "Query and control a WolfQuorum daemon", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/wolfquorum/config.toml")]
    config: PathBuf,

    /// IPC endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show vote information
    Status {
        /// Node to show (defaults to this node)
        #[arg(short, long)]
        node: Option<u32>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set cluster-wide expected votes
    Expected {
        /// New expected votes
        votes: u32,
    },
    /// Change the votes of a node
    Votes {
        /// Node ID
        node: u32,
        /// New vote weight
        votes: u32,
    },
    /// Announce that this node is about to leave
    Leave,
    /// Manage the quorum device
    Qdevice {
        #[command(subcommand)]
        action: QdeviceCommand,
    },
    /// Print quorum changes as they happen (Ctrl+C to exit)
    Watch,
}

#[derive(Subcommand)]
enum QdeviceCommand {
    /// Register the quorum device
    Register {
        /// Device name
        name: String,
        /// Votes the device carries
        #[arg(long, default_value_t = 1)]
        votes: u32,
    },
    /// Unregister the quorum device
    Unregister,
    /// Report device liveness
    Poll {
        /// Report the device as dead
        #[arg(long)]
        dead: bool,
    },
    /// Show device information
    Info,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let endpoint = cli.endpoint.clone().unwrap_or_else(|| endpoint_from_config(&cli.config));

    if let Err(e) = run(cli, &endpoint).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// IPC address from the config file, or the default
fn endpoint_from_config(path: &PathBuf) -> String {
    match WolfQuorumConfig::from_file(path) {
        Ok(config) => config.ipc.bind_address,
        Err(_) => "127.0.0.1:5410".to_string(),
    }
}

async fn run(cli: Cli, endpoint: &str) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(cli.timeout);
    let mut client = IpcClient::connect(endpoint, timeout)
        .await
        .with_context(|| format!("cannot reach wolfquorum at {}", endpoint))?;

    match cli.command {
        Commands::Status { node, json } => {
            let node_id = node.unwrap_or(LOCAL_NODE_ID);
            let info = match client.request(Request::GetInfo { node_id }).await? {
                Response::Info(info) => info,
                other => return unexpected(other),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }

            println!("Quorum Information");
            println!("==================");
            println!("Node ID:          {}", info.node_id);
            println!("Quorate:          {}", if info.quorate { "Yes" } else { "NO" });
            println!("Node Votes:       {}", info.votes);
            println!("Expected Votes:   {}", info.expected_votes);
            println!("Highest Expected: {}", info.highest_expected);
            println!("Total Votes:      {}", info.total_votes);
            println!("Quorum:           {}", info.quorum);
            if info.two_node {
                println!("Flags:            2Node");
            }
        }
        Commands::Expected { votes } => {
            expect_ok(client.request(Request::SetExpected { expected_votes: votes }).await?)?;
            println!("Expected votes set to {}", votes);
        }
        Commands::Votes { node, votes } => {
            expect_ok(
                client
                    .request(Request::SetVotes {
                        node_id: node,
                        votes,
                    })
                    .await?,
            )?;
            println!("Votes of node {} set to {}", node, votes);
        }
        Commands::Leave => {
            expect_ok(client.request(Request::Leave).await?)?;
            println!("Leave announced; stop the node before the leave timeout expires");
        }
        Commands::Qdevice { action } => match action {
            QdeviceCommand::Register { name, votes } => {
                expect_ok(client.request(Request::QdeviceRegister { name, votes }).await?)?;
                println!("Quorum device registered");
            }
            QdeviceCommand::Unregister => {
                expect_ok(client.request(Request::QdeviceUnregister).await?)?;
                println!("Quorum device unregistered");
            }
            QdeviceCommand::Poll { dead } => {
                expect_ok(client.request(Request::QdevicePoll { state: !dead }).await?)?;
            }
            QdeviceCommand::Info => match client.request(Request::QdeviceGetInfo).await? {
                Response::Qdevice(info) => {
                    println!("Name:   {}", info.name);
                    println!("Votes:  {}", info.votes);
                    println!("Alive:  {}", if info.alive { "Yes" } else { "No" });
                }
                other => return unexpected(other),
            },
        },
        Commands::Watch => {
            expect_ok(
                client
                    .request(Request::TrackStart {
                        flags: TRACK_CHANGES,
                        context: 0,
                    })
                    .await?,
            )?;
            loop {
                tokio::select! {
                    notification = client.next_notification() => print_notification(notification?),
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    Ok(())
}

fn print_notification(notification: Notification) {
    match notification {
        Notification::Quorum(n) => {
            let members: Vec<String> = n
                .nodes
                .iter()
                .filter(|e| e.state == wolfquorum::state::NodeState::Member)
                .map(|e| {
                    if e.quorum_device {
                        "qdevice".to_string()
                    } else {
                        e.node_id.to_string()
                    }
                })
                .collect();
            println!(
                "[{}] ring {}: {} members [{}]",
                if n.quorate { "QUORATE" } else { "INQUORATE" },
                n.ring_id,
                members.len(),
                members.join(", ")
            );
        }
        Notification::ExpectedVotes { expected_votes, .. } => {
            println!("expected votes now {}", expected_votes);
        }
    }
}

fn expect_ok(response: Response) -> anyhow::Result<()> {
    match response {
        Response::Ok => Ok(()),
        other => unexpected(other),
    }
}

fn unexpected<T>(response: Response) -> anyhow::Result<T> {
    match response {
        Response::Error { code, message } => bail!("{:?}: {}", code, message),
        other => bail!("unexpected response: {:?}", other),
    }
}
