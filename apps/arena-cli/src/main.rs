mod admin;
mod transport;

use std::io::BufRead;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use arena_common::{BodyConfig, SettingsPatch, WorldSettings};
use arena_kernel::World;
use arena_persist::{PuckRecord, RecordStore};
use arena_server::{ArenaServer, ServerConfig};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::admin::{AdminCommand, Flow};

#[derive(Parser)]
#[command(name = "arena", about = "Authoritative puck arena server and tools")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Server config file (JSON); missing fields take their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the effective configuration
    Info,
    /// Step a world headless and print the final body states as JSON
    Simulate {
        /// Number of physics steps
        #[arg(short, long, default_value = "600")]
        steps: u64,
        /// Number of pucks to spawn
        #[arg(short, long, default_value = "20")]
        pucks: usize,
        /// Spawn seed
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Edge-pull strength
        #[arg(long, default_value = "0")]
        arch_gravity: f32,
    },
    /// Create or extend a record store with default pucks
    Seed {
        /// Store file
        #[arg(short, long, default_value = "arena.json")]
        store: PathBuf,
        /// Number of pucks to add
        #[arg(short, long, default_value = "10")]
        pucks: usize,
    },
    /// Run the server: TCP observers plus an admin console on stdin
    Serve {
        /// Store file
        #[arg(short, long, default_value = "arena.json")]
        store: PathBuf,
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:7400")]
        listen: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("arena v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "full sync every {} broadcasts",
                config.sync().full_sync_every()
            );
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            steps,
            pucks,
            seed,
            arch_gravity,
        } => simulate(&config, steps, pucks, seed, arch_gravity)?,
        Commands::Seed { store, pucks } => {
            let store = RecordStore::open(&store)
                .with_context(|| format!("opening store {}", store.display()))?;
            let start = store.pucks().len();
            for i in 0..pucks {
                store.add_puck(PuckRecord {
                    label: Some(format!("Puck {}", start + i + 1)),
                    ..PuckRecord::new()
                })?;
            }
            println!("store now holds {} pucks", store.pucks().len());
        }
        Commands::Serve { store, listen } => serve(config, &store, &listen)?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => ServerConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn simulate(
    config: &ServerConfig,
    steps: u64,
    pucks: usize,
    seed: u64,
    arch_gravity: f32,
) -> anyhow::Result<()> {
    let mut world = World::new(ServerConfig {
        seed: Some(seed),
        ..*config
    }
    .world_options(WorldSettings::default()));
    world.update_settings(&SettingsPatch {
        arch_gravity: Some(arch_gravity),
        max_pucks: Some(u32::try_from(pucks).unwrap_or(u32::MAX)),
        ..SettingsPatch::default()
    });
    for i in 0..pucks {
        world.add_body(BodyConfig::new(format!("p{i}")))?;
    }

    let _span = tracing::info_span!("simulate", steps, pucks, seed).entered();
    for _ in 0..steps {
        world.step()?;
    }
    let moving = world.changed_states(config.movement_threshold).len();
    tracing::info!(steps = world.steps(), moving, "simulation finished");

    let report = serde_json::json!({
        "steps": world.steps(),
        "size": world.size(),
        "settings": world.settings(),
        "bodies": world.all_states(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn serve(config: ServerConfig, store_path: &Path, listen: &str) -> anyhow::Result<()> {
    let store = Arc::new(
        RecordStore::open(store_path)
            .with_context(|| format!("opening store {}", store_path.display()))?,
    );
    let server = Arc::new(ArenaServer::bootstrap(config, store.as_ref())?);
    store.subscribe(Arc::new(server.config_sync().listener(store.clone())));

    let listener = TcpListener::bind(listen).with_context(|| format!("binding {listen}"))?;
    transport::spawn_acceptor(listener, Arc::clone(&server))?;
    server.start()?;

    let quit = Arc::new(AtomicBool::new(false));
    spawn_console(Arc::clone(&store), Arc::clone(&server), Arc::clone(&quit))?;

    let result = loop {
        if quit.load(Ordering::Acquire) {
            break Ok(());
        }
        if let Err(err) = server.check() {
            break Err(err);
        }
        thread::sleep(Duration::from_millis(200));
    };
    server.shutdown();
    let stats = server.stats();
    tracing::info!(
        total_taps = stats.total_taps,
        peak_viewers = stats.peak_viewers,
        ticks = stats.ticks,
        "server stopped"
    );
    Ok(result?)
}

fn spawn_console(
    store: Arc<RecordStore>,
    server: Arc<ArenaServer>,
    quit: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("arena-console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let flow = line
                    .parse::<AdminCommand>()
                    .and_then(|cmd| admin::execute(cmd, &store, &server));
                match flow {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => {
                        quit.store(true, Ordering::Release);
                        break;
                    }
                    Err(err) => eprintln!("error: {err:#}"),
                }
            }
        })
        .context("spawning console thread")?;
    Ok(())
}
