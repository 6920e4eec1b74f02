use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cosmos-chain", version)]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "start", about = "Start a blockchain node")]
    Start {
        #[arg(long, help = "Gossip port to listen on (overrides P2P_PORT)")]
        p2p_port: Option<u16>,
        #[arg(long, help = "API port advertised to peers (overrides LISTEN_PORT)")]
        listen_port: Option<u16>,
        #[arg(long, help = "Comma-separated bootstrap peers (overrides PEERS)")]
        peers: Option<String>,
        #[arg(long, help = "Data directory for the snapshot (overrides DATA_DIR)")]
        data_dir: Option<PathBuf>,
        #[arg(long, help = "Mine whenever transactions are pending")]
        mine: bool,
    },
    #[command(name = "createwallet", about = "Generate a keypair and print its address")]
    Createwallet,
    #[command(
        name = "getbalance",
        about = "Read the balance of an address from a node snapshot"
    )]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
        #[arg(long, help = "Data directory holding the snapshot")]
        data_dir: Option<PathBuf>,
    },
    #[command(name = "printchain", about = "Print all blocks in a node snapshot")]
    Printchain {
        #[arg(long, help = "Data directory holding the snapshot")]
        data_dir: Option<PathBuf>,
    },
    #[command(name = "send", about = "Sign a transfer and push it to a running node")]
    Send {
        #[arg(long, help = "Sender private key (64 hex characters)")]
        key: String,
        #[arg(help = "Recipient address")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
        #[arg(long, default_value_t = 0, help = "Fee offered to the miner")]
        fee: u64,
        #[arg(
            long,
            default_value = "127.0.0.1:6001",
            help = "Gossip endpoint of the target node"
        )]
        node: String,
    },
}
