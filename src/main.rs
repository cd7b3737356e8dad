//! CLI for cannon-link
//!
//! Subcommands:
//! - `serve`: run the WebSocket relay broker
//! - `display`: host a game, accept one controller and log its moves
//! - `controller`: join a game, aim, fire and leave

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use cannon_link::broker::MemoryBroker;
use cannon_link::client::Session;
use cannon_link::config::{Settings, load_config};
use cannon_link::game::{GameClient, Rotation};
use cannon_link::transport::{WsConnector, start_websocket_server};
use cannon_link::utils::logging;

#[derive(Parser)]
#[command(name = "cannon-link", about = "Messaging for the entangled cannon game")]
struct Cli {
    /// Broker URL, overriding the configured one
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the WebSocket relay broker
    Serve,
    /// Host a game and log what the controller does
    Display {
        /// Game session id; generated when omitted
        #[arg(long)]
        game: Option<String>,
    },
    /// Join a game, send a rotation and a shot, then disconnect
    Controller {
        #[arg(long)]
        game: String,
        /// Cannon yaw in radians
        #[arg(long, default_value_t = 0.5)]
        yaw: f64,
        #[arg(long, default_value_t = 5.0)]
        power: f64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return;
        }
    };
    if let Some(url) = cli.url {
        settings.broker.url = url;
    }
    logging::init(&settings.log.level);

    let result = match cli.command {
        Command::Serve => run_server(&settings).await,
        Command::Display { game } => run_display(&settings, game).await,
        Command::Controller { game, yaw, power } => {
            run_controller(&settings, &game, yaw, power).await
        }
    };

    if let Err(e) = result {
        error!("cannon-link failed: {e}");
    }
}

fn game_client(settings: &Settings) -> GameClient {
    let session = Session::new(settings, Arc::new(WsConnector));
    GameClient::new(session, &settings.game.namespace)
}

async fn run_server(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let broker = MemoryBroker::new();

    tokio::select! {
        result = start_websocket_server(addr, broker) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_display(
    settings: &Settings,
    game: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let game = game.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let client = game_client(settings);
    client.session().connect().await?;

    client
        .subscribe_game_join_request(&game, |request| {
            info!("Controller joined game {}", request.game_session_id);
        })
        .await?;
    client
        .subscribe_cannon_rotation(&game, |m| {
            let r = m.rotation;
            info!("Cannon rotated to ({:.2}, {:.2}, {:.2})", r.x, r.y, r.z);
        })
        .await?;
    client
        .subscribe_cannon_fire(&game, |m| info!("Cannon fired with power {:.1}", m.power))
        .await?;

    info!("Hosting game {game}; press Ctrl-C to end it");
    tokio::signal::ctrl_c().await?;

    client.publish_game_over(&game);
    client.session().disconnect().await?;
    Ok(())
}

async fn run_controller(
    settings: &Settings,
    game: &str,
    yaw: f64,
    power: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = game_client(settings);
    client.session().connect().await?;

    let reply = client.send_game_join_request(game).await?;
    if reply.accepted {
        info!("Joined game {game}");
        client.publish_cannon_rotation(game, Rotation::new(0.0, yaw, 0.0));
        client.publish_cannon_fire(game, power);
    } else {
        warn!("Game {game} already has a controller");
    }

    client.session().disconnect().await?;
    Ok(())
}
