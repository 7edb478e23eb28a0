//! Bootstrap binary: parses configuration, brings up a transport (TCP mesh
//! or in-process loopback mesh), initializes the block layer, and drives an
//! interactive `read`/`write` prompt on the controlling rank while every
//! other rank simply serves inbound requests until shutdown.

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dsm::{Args, Config, Dsm, DsmError, LoopbackTransport, Result, TcpTransport};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    if args.loopback {
        run_loopback(&args).await
    } else {
        run_tcp(&args).await
    }
}

/// Every rank as a task of this one process, connected by in-memory
/// channels. The controlling rank (`--process-id`, default 0) gets the
/// interactive prompt; every other rank just serves inbound requests.
async fn run_loopback(args: &Args) -> Result<()> {
    let base_cfg = args.resolve_config()?;
    let mesh = LoopbackTransport::mesh(base_cfg.n);

    let mut handles = Vec::with_capacity(mesh.len());
    for (rank, (transport, inbound)) in mesh.into_iter().enumerate() {
        let cfg = Config::new(base_cfg.n, base_cfg.k, base_cfg.t, rank as u32)?;
        let dsm = Dsm::init(cfg, transport, inbound)?;
        handles.push(Arc::new(dsm));
    }

    let controller = handles[args.process_id as usize].clone();
    info!(
        "loopback mesh up: n={} k={} t={}, driving rank {}",
        base_cfg.n, base_cfg.k, base_cfg.t, args.process_id
    );
    run_repl(&controller).await?;

    for handle in handles {
        match Arc::try_unwrap(handle) {
            Ok(dsm) => dsm.cleanup().await?,
            Err(_) => {} // other clones (the controller) still held; best effort
        }
    }
    Ok(())
}

/// One OS process per rank, connected over real TCP sockets.
async fn run_tcp(args: &Args) -> Result<()> {
    let cfg = args.resolve_config()?;
    let addrs = args.resolve_peer_addrs(&cfg)?;

    info!(
        "rank {} joining n={} k={} t={} over tcp",
        cfg.rank, cfg.n, cfg.k, cfg.t
    );
    let (transport, inbound) = TcpTransport::connect_mesh(cfg.rank, &addrs).await?;
    let dsm = Dsm::init(cfg, transport, inbound)?;

    if cfg.rank == 0 {
        run_repl(&dsm).await?;
    } else {
        info!("rank {} serving until interrupted", cfg.rank);
        tokio::signal::ctrl_c().await.ok();
    }

    dsm.cleanup().await
}

/// `read <pos> <len>`, `write <pos> <bytes...>`, `quit` — the same three
/// commands as the reference implementation's interactive mode.
async fn run_repl(dsm: &Dsm) -> Result<()> {
    println!(
        "dsm ready: {} bytes across {} blocks of {} bytes each, this rank owns {} block(s)",
        dsm.config().address_space(),
        dsm.config().k,
        dsm.config().t,
        dsm.config().local_block_count(dsm.config().rank)
    );
    println!("commands: read <pos> <len> | write <pos> <bytes...> | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("dsm> ");
        use std::io::Write;
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.map_err(|e| DsmError::Memory(e.to_string()))? else {
            break;
        };
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("quit") | Some("exit") => break,
            Some("read") => {
                let (Some(pos), Some(len)) = (parts.next(), parts.next()) else {
                    println!("usage: read <pos> <len>");
                    continue;
                };
                match (pos.parse::<u64>(), len.parse::<u64>()) {
                    (Ok(pos), Ok(len)) => match dsm.read(pos, len).await {
                        Ok(data) => println!("{:?}", data),
                        Err(e) => println!("error: {e}"),
                    },
                    _ => println!("usage: read <pos> <len>"),
                }
            }
            Some("write") => {
                let Some(pos) = parts.next() else {
                    println!("usage: write <pos> <bytes...>");
                    continue;
                };
                let Ok(pos) = pos.parse::<u64>() else {
                    println!("usage: write <pos> <bytes...>");
                    continue;
                };
                let bytes: std::result::Result<Vec<u8>, _> = parts.map(|s| s.parse::<u8>()).collect();
                match bytes {
                    Ok(bytes) if !bytes.is_empty() => match dsm.write(pos, &bytes).await {
                        Ok(()) => println!("ok"),
                        Err(e) => println!("error: {e}"),
                    },
                    _ => println!("usage: write <pos> <byte> [<byte> ...]"),
                }
            }
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
    }

    Ok(())
}
