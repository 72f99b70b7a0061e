//! A headless terminal client for turn_sync game sessions.
//!
//! The client joins one game over WebSocket, prints what the effective view
//! shows as it changes, and reads commands from stdin.

use anyhow::{Context, Result};
use pico_args::Arguments;
use ts_client::{app::App, logging};
use turn_sync::{ConfigOverrides, ParticipantId, SessionActor, SessionConfig};

const HELP: &str = "\
Join a turn_sync game session

USAGE:
  ts_client [OPTIONS]

OPTIONS:
  --server URL          WebSocket endpoint  [env: TURN_SYNC_ENDPOINT, default: ws://localhost:8000]
  --game ID             Game code           [env: TURN_SYNC_GAME_ID]
  --player ID           Participant id      [env: TURN_SYNC_PARTICIPANT_ID]
  --token TOKEN         Access token        [env: TURN_SYNC_TOKEN]

FLAGS:
  -h, --help            Print help information
";

#[derive(Debug)]
struct Args {
    server: Option<String>,
    game: Option<String>,
    player: Option<String>,
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let mut pargs = Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = parse_args(pargs)?;
    run(args).await
}

fn parse_args(mut pargs: Arguments) -> Result<Args> {
    let args = Args {
        server: pargs
            .opt_value_from_str("--server")
            .context("Invalid --server")?,
        game: pargs.opt_value_from_str("--game").context("Invalid --game")?,
        player: pargs
            .opt_value_from_str("--player")
            .context("Invalid --player")?,
        token: pargs
            .opt_value_from_str("--token")
            .context("Invalid --token")?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        anyhow::bail!("Unexpected arguments: {remaining:?}");
    }
    Ok(args)
}

async fn run(args: Args) -> Result<()> {
    let config = SessionConfig::from_env(ConfigOverrides {
        endpoint: args.server,
        game_id: args.game,
        participant_id: args.player,
        token: args.token,
    })
    .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        endpoint = %config.connection.endpoint,
        game_id = %config.connection.game_id,
        "Joining game"
    );

    let local = ParticipantId::new(&config.connection.participant_id);
    let game_id = config.connection.game_id.clone();
    let (session, updates, task) = SessionActor::spawn(config);

    App::new(session, updates, local, game_id).run().await?;
    task.await.context("Session task failed")?;
    Ok(())
}
