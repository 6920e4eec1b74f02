use clap::Parser;
use cosmos_chain::config::parse_peer_list;
use cosmos_chain::network::server::push_transaction;
use cosmos_chain::storage::{Snapshot, SNAPSHOT_FILE};
use cosmos_chain::{
    Chain, Command, Keypair, Node, NodeConfig, Opt, Transaction, UtxoLedger,
};
use log::{error, LevelFilter};
use std::path::PathBuf;
use std::process;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Start {
            p2p_port,
            listen_port,
            peers,
            data_dir,
            mine,
        } => {
            let mut config = NodeConfig::from_env();
            if let Some(port) = p2p_port {
                config.p2p_port = port;
            }
            if let Some(port) = listen_port {
                config.listen_port = port;
            }
            if let Some(raw) = peers {
                config.peers = parse_peer_list(&raw);
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }

            let node = Node::bootstrap(config)?;
            println!("Node identity: {}", node.miner_address());
            node.run(mine)?;
        }
        Command::Createwallet => {
            let keypair = Keypair::generate();
            println!("Your new address: {}", keypair.address());
            println!("Public key:  {}", keypair.public_key_hex());
            println!("Private key: {}", keypair.secret_hex());
        }
        Command::GetBalance { address, data_dir } => {
            let (chain, _) = load_chain(data_dir)?;
            let mut utxo = UtxoLedger::new();
            utxo.rebuild(&chain)?;
            println!("Balance of {address}: {}", utxo.balance(&address));
        }
        Command::Printchain { data_dir } => {
            let (chain, difficulty) = load_chain(data_dir)?;
            println!("Chain height: {}, difficulty: {difficulty}", chain.height());
            for block in chain.blocks() {
                println!("Block {} ({})", block.index, block.hash);
                println!("  previous: {}", block.previous_hash);
                println!("  timestamp: {}, nonce: {}", block.timestamp, block.nonce);
                for tx in &block.transactions {
                    match tx.from_address() {
                        Some(from) => println!(
                            "  - {} {} -> {} amount {} fee {}",
                            tx.tx_id(),
                            from,
                            tx.to_address(),
                            tx.amount(),
                            tx.fee()
                        ),
                        None => println!(
                            "  - {} coinbase -> {} amount {}",
                            tx.tx_id(),
                            tx.to_address(),
                            tx.amount()
                        ),
                    }
                }
                println!();
            }
        }
        Command::Send {
            key,
            to,
            amount,
            fee,
            node,
        } => {
            let keypair = Keypair::from_secret_hex(&key)?;
            let mut tx = Transaction::transfer(&keypair.address(), &to, amount, fee)?;
            tx.sign(&keypair)?;
            push_transaction(&node, &tx)?;
            println!("Submitted transaction {}", tx.tx_id());
        }
    }
    Ok(())
}

/// Read the chain out of the snapshot a node left in `data_dir`.
fn load_chain(data_dir: Option<PathBuf>) -> Result<(Chain, u32), Box<dyn std::error::Error>> {
    let config = match data_dir {
        Some(dir) => NodeConfig {
            data_dir: dir,
            ..NodeConfig::from_env()
        },
        None => NodeConfig::from_env(),
    };
    let path = config.snapshot_path();
    let snapshot = Snapshot::load(&path)?.ok_or_else(|| {
        format!(
            "No snapshot found at {} - start a node first (looked for {SNAPSHOT_FILE})",
            path.display()
        )
    })?;
    let difficulty = snapshot.difficulty;
    Ok((Chain::from_snapshot(snapshot.chain, difficulty)?, difficulty))
}
