use std::path::PathBuf;

use clap::{Parser, Subcommand};
use client::{
    terminal::{next_input, TerminalView},
    ClientConfig, ClientError, HttpTransport, Reconciler, View,
};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type App = Reconciler<HttpTransport, TerminalView<std::io::Stdout>>;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Terminal client for the MapChat route-planning assistant"
)]
struct Args {
    /// JSON configuration file (defaults to ./mapchat_config.json when present)
    #[arg(long, env = "MAPCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Backend root URL, overriding the configuration file
    #[arg(long, env = "MAPCHAT_BASE_URL")]
    base_url: Option<String>,

    /// Use the non-streaming /chat endpoint
    #[arg(long)]
    no_stream: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Geocode both endpoints and plan a route
    Route {
        origin: String,
        destination: String,
        /// Intermediate stop, may be repeated
        #[arg(long = "via")]
        waypoints: Vec<String>,
        /// Also list places along the route
        #[arg(long)]
        places: bool,
        /// Also list natural features along the route
        #[arg(long)]
        features: bool,
        #[arg(long)]
        radius_km: Option<f64>,
        #[arg(long)]
        features_radius_km: Option<f64>,
    },
    /// Send one message to the assistant
    Chat { message: String },
    /// Interactive chat session
    Repl,
    /// Print the conversation history
    History,
    /// Clear the server-side conversation
    Reset,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "client=info,mapchat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(base_url) = args.base_url {
        config = config.with_base_url(base_url).validated()?;
    }
    if args.no_stream {
        config.streaming = false;
    }
    tracing::info!("using backend at {}", config.base_url);

    let transport = HttpTransport::from_config(&config);
    let mut app = Reconciler::new(transport, TerminalView::stdout(), &config);

    match args.command {
        Command::Route {
            origin,
            destination,
            waypoints,
            places,
            features,
            radius_km,
            features_radius_km,
        } => {
            {
                let form = app.form_mut();
                form.origin = origin;
                form.destination = destination;
                form.show_places = places;
                form.show_features = features;
                if let Some(radius) = radius_km {
                    form.places_radius_km = radius;
                }
                if let Some(radius) = features_radius_km {
                    form.features_radius_km = radius;
                }
            }
            for waypoint in &waypoints {
                app.add_waypoint(waypoint).await?;
            }
            app.generate_route().await?;
        }
        Command::Chat { message } => {
            app.send_chat(&message).await?;
        }
        Command::Repl => repl(&mut app).await?,
        Command::History => {
            app.load_history().await?;
        }
        Command::Reset => app.reset_conversation().await?,
    }

    Ok(())
}

async fn repl(app: &mut App) -> Result<(), ClientError> {
    println!("MapChat: /route FROM -> TO, /history, /reset, /quit.");
    println!("Ctrl-C stops a reply, or exits at the prompt.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match line {
            "/quit" | "/exit" => break,
            "/history" => app.load_history().await.map(|_| ()),
            "/reset" => app.reset_conversation().await,
            _ if line.starts_with("/route") => route_command(app, &line["/route".len()..]).await,
            message => stream_reply(app, message).await,
        };
        if let Err(err) = result {
            tracing::debug!("command failed: {err}");
        }
    }
    Ok(())
}

async fn route_command(app: &mut App, args: &str) -> Result<(), ClientError> {
    if let Some((origin, destination)) = args.split_once("->") {
        let form = app.form_mut();
        form.origin = origin.trim().to_string();
        form.destination = destination.trim().to_string();
    }
    app.generate_route().await
}

/// Streams one reply, cancelling on Ctrl-C.
async fn stream_reply(app: &mut App, message: &str) -> Result<(), ClientError> {
    if !app.streaming() {
        return app.send_chat(message).await.map(|_| ());
    }

    let mut events = app.open_chat(message).await?;
    loop {
        tokio::select! {
            next = events.next() => match next {
                Some(event) => {
                    let terminal = event.is_terminal();
                    if terminal {
                        drop(events);
                        app.apply(event).await?;
                        return Ok(());
                    }
                    app.apply(event).await?;
                }
                None => {
                    app.abandon_stream();
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                drop(events);
                app.abandon_stream();
                app.view_mut().show_error("cancelled");
                return Ok(());
            }
        }
    }
}
