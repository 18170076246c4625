use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use yt_pubsub::config::SubscriberConfig;
use yt_pubsub::events::Event;
use yt_pubsub::subscription::{self, Operation};
use yt_pubsub::{HubClient, Subscriber};

/// yt-pubsub: get notified when YouTube channels upload.
///
/// Subscribes to channel feeds through a WebSub hub and listens for the
/// hub's verification and notification callbacks.
#[derive(Parser)]
#[command(name = "yt-pubsub", version, about)]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the YT_PUBSUB_* environment variables.
#[derive(Args)]
struct GlobalOpts {
    /// Public callback URL the hub will call (YT_PUBSUB_CALLBACK_URL)
    #[arg(long, global = true)]
    callback: Option<String>,

    /// Hub endpoint (YT_PUBSUB_HUB_URL)
    #[arg(long, global = true)]
    hub: Option<String>,

    /// Shared secret for notification signatures (YT_PUBSUB_SECRET)
    #[arg(long, global = true)]
    secret: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the callback listener and print events as they arrive
    Serve {
        /// Port to listen on (default: 3000)
        #[arg(long)]
        port: Option<u16>,

        /// Route to serve (default: /)
        #[arg(long)]
        path: Option<String>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,

        /// Subscribe to these channel ids once the listener is up
        #[arg(long = "subscribe", value_name = "CHANNEL_ID")]
        channels: Vec<String>,

        /// Print events as JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// Send a subscribe request for one or more channels
    Subscribe {
        #[arg(required = true)]
        channels: Vec<String>,
    },

    /// Send an unsubscribe request for one or more channels
    Unsubscribe {
        #[arg(required = true)]
        channels: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("yt_pubsub=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            path,
            bind,
            channels,
            json,
        } => {
            let mut config = load_config(&cli.opts)?;
            if let Some(port) = port {
                config = config.with_port(port);
            }
            if let Some(path) = path {
                config = config.with_path(path);
            }
            if let Some(bind) = bind {
                config = config.with_bind(bind);
            }
            serve(config, channels, json).await?;
        }

        Commands::Subscribe { channels } => {
            let config = load_config(&cli.opts)?;
            send_requests(config, channels, Operation::Subscribe).await?;
        }

        Commands::Unsubscribe { channels } => {
            let config = load_config(&cli.opts)?;
            send_requests(config, channels, Operation::Unsubscribe).await?;
        }
    }

    Ok(())
}

/// Env config with command-line overrides applied.
fn load_config(opts: &GlobalOpts) -> Result<SubscriberConfig> {
    let mut config = SubscriberConfig::load_with_callback(opts.callback.clone())?;
    if let Some(hub) = &opts.hub {
        config = config.with_hub_url(hub.clone());
    }
    if let Some(secret) = &opts.secret {
        config = config.with_secret(secret.clone());
    }
    Ok(config)
}

async fn serve(config: SubscriberConfig, channels: Vec<String>, json: bool) -> Result<()> {
    let (subscriber, mut events) = Subscriber::new(config)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                }
            } else {
                print_event(&event);
            }
        }
    });

    if !channels.is_empty() {
        // The hub verifies by calling us back, so these go out after the
        // listener is scheduled; verification shows up as `subscribe` events.
        subscriber.subscribe(channels)?;
    }

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    };
    subscriber.serve_with_shutdown(shutdown).await?;
    printer.abort();
    Ok(())
}

async fn send_requests(
    config: SubscriberConfig,
    channels: Vec<String>,
    operation: Operation,
) -> Result<()> {
    let requests = subscription::build_all(channels, operation, &config)?;
    let hub = HubClient::new(std::sync::Arc::new(config))?;

    let mut failures = 0;
    for request in &requests {
        match hub.send(request).await {
            Ok(()) => println!(
                "{} {} {}",
                "✓".green(),
                operation.as_str(),
                request.channel_id.bold()
            ),
            Err(e) => {
                failures += 1;
                println!(
                    "{} {} {}: {e:#}",
                    "✗".red(),
                    operation.as_str(),
                    request.channel_id.bold()
                );
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} hub requests failed", requests.len());
    }
    println!(
        "{}",
        "The hub will now call the listener to verify the request.".dimmed()
    );
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::Subscribe(v) | Event::Unsubscribe(v) | Event::Verified(v) => {
            let lease = v
                .lease_seconds
                .as_ref()
                .map(|l| format!(" (lease {l})"))
                .unwrap_or_default();
            println!("{} {}{}", event.name().cyan().bold(), v.channel, lease.dimmed());
        }
        Event::Denied(v) => {
            let reason = v.reason.as_deref().unwrap_or("no reason given");
            println!("{} {}: {}", "denied".red().bold(), v.channel, reason);
        }
        Event::Notified(n) => {
            println!(
                "{} {} by {}",
                "notified".green().bold(),
                n.video.title.bold(),
                n.channel.name
            );
            println!("  {}", n.video.link.dimmed());
            println!(
                "  published {} · updated {}",
                n.published.to_rfc3339(),
                n.updated.to_rfc3339()
            );
        }
    }
}
