use anyhow::Context;
use chatgame::app::{
    App,
    RunState,
    actix_api::ActixGameApi,
    init_tracing,
    notifier::ChannelNotifier,
    sled_store::SledGameStore,
};
use clap::Parser;
use std::{
    env::current_dir,
    fs,
    path::PathBuf,
    time::Duration,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// HTTP port for the game API; a random free port when omitted
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for the record store; defaults to ./chatgame_data/games
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 30)]
    sweep_secs: u64,

    #[arg(short, long, default_value = "false")]
    tracing: bool,
}

async fn handle_interupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.tracing {
        init_tracing();
    }

    let data_root = match &args.data_dir {
        Some(path) => path.clone(),
        None => current_dir()
            .context("determine process working directory")?
            .join("chatgame_data"),
    };
    let store_path = data_root.join("games");
    fs::create_dir_all(&store_path)?;
    tracing::info!(
        "Using sled storage directory: {}",
        store_path.display()
    );

    let store = SledGameStore::open(&store_path)?;
    let notifier = ChannelNotifier::new();
    let api = ActixGameApi::new(args.port, notifier.clone()).await?;
    let mut app = App::new(
        store,
        api,
        notifier,
        Duration::from_secs(args.sweep_secs),
    );

    tracing::info!("Starting game service");
    loop {
        let interrupt = handle_interupt();
        match app.run(interrupt).await? {
            RunState::Continue => continue,
            RunState::Exit => {
                tracing::info!("Exiting game service");
                return Ok(());
            }
        }
    }
}
