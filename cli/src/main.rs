use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sync::api::ApiClient;
use sync::types::{AnnotationDraft, ModelTransform, Vector3};
use sync::{ConnectionStatus, StaticCredential, SyncClient, SyncConfig, SyncError, SyncEvent};
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing auth token; pass --token or set SCENEROOM_TOKEN")]
    MissingToken,
    #[error("could not connect to the broker")]
    ConnectFailed,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Parser, Debug)]
#[command(name = "sceneroom-cli", about = "SceneRoom sync client CLI")]
struct Cli {
    #[arg(long, env = "SCENEROOM_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "SCENEROOM_TOKEN")]
    token: Option<String>,

    #[arg(long, env = "SCENEROOM_NAME", default_value = "cli")]
    display_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the broker's health endpoint.
    Ping,
    /// Join a room and print every sync event until interrupted.
    Watch { room_id: String },
    /// Join a room, send one chat message, and exit once acknowledged.
    Chat { room_id: String, body: String },
    /// Join a room and create an annotation.
    Annotate {
        room_id: String,
        text: String,
        /// Anchor point as `x,y,z`.
        #[arg(long, value_parser = parse_vector3, default_value = "0,0,0")]
        anchor: Vector3,
        #[arg(long, default_value = "yellow")]
        color: String,
        #[arg(long)]
        hidden: bool,
    },
    /// List a room's persisted annotations over REST.
    Annotations { room_id: String },
    /// List a room's persisted chat backlog over REST.
    Messages { room_id: String },
    /// Persist a model transform over REST.
    Transform {
        model_id: String,
        #[arg(long, value_parser = parse_vector3, default_value = "0,0,0")]
        position: Vector3,
        #[arg(long, value_parser = parse_vector3, default_value = "0,0,0")]
        rotation: Vector3,
        #[arg(long, value_parser = parse_vector3, default_value = "1,1,1")]
        scale: Vector3,
    },
}

fn parse_vector3(value: &str) -> Result<Vector3, String> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 3 {
        return Err("expected `x,y,z`".to_owned());
    }
    let mut components = [0.0f64; 3];
    for (slot, part) in components.iter_mut().zip(&parts) {
        *slot = part.trim().parse().map_err(|e| format!("{e}"))?;
    }
    Ok(Vector3::new(components[0], components[1], components[2]))
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = SyncConfig {
        base_url: cli.base_url,
        display_name: cli.display_name,
        ..SyncConfig::default()
    };

    match cli.command {
        Command::Ping => {
            let api = api_client(&config, cli.token.as_deref())?;
            api.health().await?;
            println!("ok");
            Ok(())
        }

        Command::Annotations { room_id } => {
            let api = api_client(&config, cli.token.as_deref())?;
            for annotation in api.list_annotations(&room_id).await? {
                println!(
                    "{}  [{}]  {}",
                    annotation.id, annotation.color_tag, annotation.text
                );
            }
            Ok(())
        }

        Command::Messages { room_id } => {
            let api = api_client(&config, cli.token.as_deref())?;
            for message in api.list_messages(&room_id).await? {
                println!("[{}] {}", message.author_display_name, message.body);
            }
            Ok(())
        }

        Command::Transform {
            model_id,
            position,
            rotation,
            scale,
        } => {
            let api = api_client(&config, cli.token.as_deref())?;
            let transform = ModelTransform {
                position,
                rotation,
                scale,
            };
            api.update_transform(&model_id, &transform).await?;
            println!("persisted transform for {model_id}");
            Ok(())
        }

        Command::Watch { room_id } => {
            let client = build_client(config, cli.token)?;
            let mut events = client.subscribe();
            client.connect()?;
            await_connected(&mut events).await?;
            client.join_room(&room_id).await?;
            eprintln!("watching {room_id}; ctrl-c to stop");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(event) => print_event(&event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            eprintln!("lagged, skipped {skipped} events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            client.shutdown();
            Ok(())
        }

        Command::Chat { room_id, body } => {
            let client = build_client(config, cli.token)?;
            let mut events = client.subscribe();
            client.connect()?;
            await_connected(&mut events).await?;
            client.join_room(&room_id).await?;
            client.send_chat(&body).await?;
            println!("sent");
            client.shutdown();
            Ok(())
        }

        Command::Annotate {
            room_id,
            text,
            anchor,
            color,
            hidden,
        } => {
            let client = build_client(config, cli.token)?;
            let mut events = client.subscribe();
            client.connect()?;
            await_connected(&mut events).await?;
            client.join_room(&room_id).await?;
            let annotation = client
                .create_annotation(AnnotationDraft {
                    text,
                    anchor,
                    color_tag: color,
                    visible: !hidden,
                })
                .await?;
            println!("created annotation {}", annotation.id);
            client.shutdown();
            Ok(())
        }
    }
}

fn api_client(config: &SyncConfig, token: Option<&str>) -> Result<ApiClient, CliError> {
    let token = token.ok_or(CliError::MissingToken)?.to_owned();
    Ok(ApiClient::new(
        &config.base_url,
        Arc::new(StaticCredential(token)),
    )?)
}

fn build_client(config: SyncConfig, token: Option<String>) -> Result<SyncClient, CliError> {
    let token = token.ok_or(CliError::MissingToken)?;
    Ok(SyncClient::new(config, Arc::new(StaticCredential(token)))?)
}

/// Wait for the driver to report a live transport.
async fn await_connected(events: &mut broadcast::Receiver<SyncEvent>) -> Result<(), CliError> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(15), events.recv())
            .await
            .map_err(|_| CliError::ConnectFailed)?;
        match event {
            Ok(SyncEvent::StatusChanged(ConnectionStatus::Connected)) => return Ok(()),
            // The driver lands here after exhausting its attempts.
            Ok(SyncEvent::StatusChanged(ConnectionStatus::Disconnected)) => {
                return Err(CliError::ConnectFailed);
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return Err(CliError::ConnectFailed),
        }
    }
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::StatusChanged(status) => println!("status: {status:?}"),
        SyncEvent::RoomJoined { room_id, roster } => {
            println!("joined {room_id} with {} peer(s)", roster.len());
        }
        SyncEvent::RoomLeft { room_id } => println!("left {room_id}"),
        SyncEvent::ParticipantJoined(participant) => {
            println!("+ {} ({})", participant.display_name, participant.id);
        }
        SyncEvent::ParticipantLeft { participant_id } => println!("- {participant_id}"),
        SyncEvent::CameraUpdated {
            participant_id,
            pose,
        } => {
            println!(
                "camera {participant_id}: pos ({:.2}, {:.2}, {:.2}) zoom {:.2}",
                pose.position.x, pose.position.y, pose.position.z, pose.zoom_factor
            );
        }
        SyncEvent::AnnotationCreated(annotation) => {
            println!("annotation {}: {}", annotation.id, annotation.text);
        }
        SyncEvent::AnnotationUpdated { annotation_id } => {
            println!("annotation {annotation_id} updated");
        }
        SyncEvent::AnnotationDeleted { annotation_id } => {
            println!("annotation {annotation_id} deleted");
        }
        SyncEvent::ChatMessage(message) => {
            println!("[{}] {}", message.author_display_name, message.body);
        }
        SyncEvent::TypingChanged {
            display_name,
            is_typing,
        } => {
            if *is_typing {
                println!("{display_name} is typing...");
            } else {
                println!("{display_name} stopped typing");
            }
        }
    }
}
