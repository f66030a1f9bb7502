//! bankwire - Distributed Banking over UDP
//!
//! One binary, two roles: a banking server with simulated message loss,
//! and a client exercising at-least-once / at-most-once invocation
//! semantics against it.

mod bank;
mod config;
mod network;
mod protocol;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bank::Bank;
use config::Config;
use network::{resolve_host, Client, ClientConfig, Semantics, Server, ServerConfig};
use protocol::{Currency, OpCode};

/// bankwire - distributed banking over UDP
#[derive(Parser)]
#[command(name = "bankwire")]
#[command(version = "0.1.0")]
#[command(about = "Distributed banking over UDP with selectable invocation semantics", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the banking server
    Server {
        /// Port to listen on (default: 9000)
        #[arg(long)]
        port: Option<u16>,

        /// Probability of dropping incoming requests, 0..1 (default: 0)
        #[arg(long = "lossReq")]
        loss_req: Option<f64>,

        /// Probability of dropping outgoing replies, 0..1 (default: 0)
        #[arg(long = "lossRep")]
        loss_rep: Option<f64>,

        /// Reply-cache lifetime for at-most-once requests, seconds (default: 60)
        #[arg(long = "dedup-ttl")]
        dedup_ttl: Option<u64>,
    },

    /// Invoke one bank operation against a server
    Client {
        /// Server address to connect to
        #[arg(long, default_value = "127.0.0.1")]
        server: String,

        /// Server port (default: 9000)
        #[arg(long)]
        port: Option<u16>,

        /// Invocation semantics: "atmost" (or "at-most-once") selects
        /// at-most-once, anything else at-least-once
        #[arg(long)]
        sem: Option<String>,

        /// Receive timeout per attempt, milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Send attempts before giving up
        #[arg(long)]
        retry: Option<u32>,

        #[command(subcommand)]
        op: ClientOp,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ClientOp {
    /// Open a new account
    Open {
        #[arg(long)]
        name: String,
        /// Password, 1..16 bytes
        #[arg(long)]
        password: String,
        /// Account currency (CNY or SGD)
        #[arg(long, default_value = "CNY")]
        currency: Currency,
        /// Initial balance
        #[arg(long, default_value_t = 0.0)]
        initial: f64,
    },

    /// Close an account
    Close {
        #[arg(long)]
        name: String,
        #[arg(long)]
        account: i32,
        #[arg(long)]
        password: String,
    },

    /// Deposit into an account (non-idempotent)
    Deposit {
        #[arg(long)]
        name: String,
        #[arg(long)]
        account: i32,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "CNY")]
        currency: Currency,
        #[arg(long)]
        amount: f64,
    },

    /// Withdraw from an account (non-idempotent)
    Withdraw {
        #[arg(long)]
        name: String,
        #[arg(long)]
        account: i32,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "CNY")]
        currency: Currency,
        #[arg(long)]
        amount: f64,
    },

    /// Query an account balance (idempotent)
    Query {
        #[arg(long)]
        name: String,
        #[arg(long)]
        account: i32,
        #[arg(long)]
        password: String,
    },

    /// Transfer between two accounts (non-idempotent)
    Transfer {
        #[arg(long)]
        name: String,
        #[arg(long)]
        from: i32,
        #[arg(long)]
        password: String,
        #[arg(long)]
        to: i32,
        #[arg(long, default_value = "CNY")]
        currency: Currency,
        #[arg(long)]
        amount: f64,
    },

    /// Register for account update callbacks and wait for them
    Monitor {
        /// Subscription length in seconds
        #[arg(long)]
        seconds: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Server {
            port,
            loss_req,
            loss_rep,
            dedup_ttl,
        } => {
            run_server(config, port, loss_req, loss_rep, dedup_ttl).await?;
        }
        Commands::Client {
            server,
            port,
            sem,
            timeout,
            retry,
            op,
        } => {
            run_client(config, server, port, sem, timeout, retry, op).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Run the banking server until terminated externally
async fn run_server(
    cfg: Config,
    port: Option<u16>,
    loss_req: Option<f64>,
    loss_rep: Option<f64>,
    dedup_ttl: Option<u64>,
) -> anyhow::Result<()> {
    let server_config = ServerConfig {
        port: port.unwrap_or(cfg.network.port),
        loss_req: loss_req.unwrap_or(cfg.simulation.loss_req),
        loss_rep: loss_rep.unwrap_or(cfg.simulation.loss_rep),
        dedup_ttl: Duration::from_secs(dedup_ttl.unwrap_or(cfg.network.dedup_ttl_secs)),
    };
    anyhow::ensure!(
        (0.0..=1.0).contains(&server_config.loss_req),
        "--lossReq must be within 0..1, got {}",
        server_config.loss_req
    );
    anyhow::ensure!(
        (0.0..=1.0).contains(&server_config.loss_rep),
        "--lossRep must be within 0..1, got {}",
        server_config.loss_rep
    );

    let server = Server::bind(server_config, Bank::new()).await?;
    println!("bankwire server listening on {}", server.local_addr()?);
    println!("Press Ctrl+C to stop.");
    server.run().await?;
    Ok(())
}

/// Run one client operation and print the result
async fn run_client(
    cfg: Config,
    server: String,
    port: Option<u16>,
    sem: Option<String>,
    timeout: Option<u64>,
    retry: Option<u32>,
    op: ClientOp,
) -> anyhow::Result<()> {
    let port = port.unwrap_or(cfg.network.port);
    let server_addr = resolve_host(&server, port).await?;
    let semantics = Semantics::from_arg(sem.as_deref().unwrap_or(&cfg.invocation.semantics));
    let client_config = ClientConfig {
        server_addr,
        semantics,
        timeout: Duration::from_millis(timeout.unwrap_or(cfg.invocation.timeout_ms)),
        retry: retry.unwrap_or(cfg.invocation.retry),
    };

    println!(
        "server={}  sem={}  timeout={}ms  retry={}",
        server_addr,
        semantics,
        client_config.timeout.as_millis(),
        client_config.retry
    );
    let client = Client::connect(client_config).await?;

    match op {
        ClientOp::Open {
            name,
            password,
            currency,
            initial,
        } => {
            let rep = client.open(&name, &password, currency, initial).await?;
            println!(
                "[OK] account opened: accountNo={} balance={:.2}",
                rep.account_no, rep.balance
            );
        }
        ClientOp::Close {
            name,
            account,
            password,
        } => {
            let rep = client.close(&name, account, &password).await?;
            println!("[OK] {}", rep.info);
        }
        ClientOp::Deposit {
            name,
            account,
            password,
            currency,
            amount,
        } => {
            let rep = client
                .deposit(&name, account, &password, currency, amount)
                .await?;
            println!("[OK] new balance: {:.2}", rep.new_balance);
        }
        ClientOp::Withdraw {
            name,
            account,
            password,
            currency,
            amount,
        } => {
            let rep = client
                .withdraw(&name, account, &password, currency, amount)
                .await?;
            println!("[OK] new balance: {:.2}", rep.new_balance);
        }
        ClientOp::Query {
            name,
            account,
            password,
        } => {
            let rep = client.query_balance(&name, account, &password).await?;
            println!("[OK] currency={} balance={:.2}", rep.currency, rep.balance);
        }
        ClientOp::Transfer {
            name,
            from,
            password,
            to,
            currency,
            amount,
        } => {
            let rep = client
                .transfer(&name, from, &password, to, currency, amount)
                .await?;
            println!(
                "[OK] fromNewBal={:.2} toNewBal={:.2}",
                rep.from_balance, rep.to_balance
            );
        }
        ClientOp::Monitor { seconds } => {
            println!("== waiting for account update callbacks for {seconds} seconds ==");
            client
                .monitor(seconds, |u| {
                    println!(
                        "[CALLBACK] type={} acc={} cur={} newBal={:.2} info={}",
                        update_type_name(u.update_type),
                        u.account_no,
                        u.currency,
                        u.new_balance,
                        u.info
                    );
                })
                .await?;
            println!("== monitor finished ==");
        }
    }

    Ok(())
}

fn update_type_name(raw: u16) -> String {
    OpCode::from_u16(raw).map_or_else(|| format!("UNKNOWN_OP({raw})"), |op| op.to_string())
}
