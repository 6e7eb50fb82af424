use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use shopdesk_lib::{
    fetch_profile, ClientConfig, Credentials, SessionClient, SessionStatus, VERSION,
};

const USAGE: &str = "\
Usage: shopdesk <command>

Commands:
  login <username>   Sign in (password read from SHOPDESK_PASSWORD)
  whoami             Show the signed-in user and their landing route
  get <path>         Authenticated GET, prints the JSON response
  logout             Sign out and forget stored tokens
  status             Show the restored session state";

#[derive(Debug)]
enum Command {
    Login { username: String },
    Whoami,
    Get { path: String },
    Logout,
    Status,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command> {
    let command = args.next().ok_or_else(|| anyhow!("missing command"))?;

    let parsed = match command.as_str() {
        "login" => Command::Login {
            username: args
                .next()
                .ok_or_else(|| anyhow!("login needs a username"))?,
        },
        "whoami" => Command::Whoami,
        "get" => Command::Get {
            path: args.next().ok_or_else(|| anyhow!("get needs a path"))?,
        },
        "logout" => Command::Logout,
        "status" => Command::Status,
        other => bail!("unknown command {other:?}"),
    };

    if let Some(extra) = args.next() {
        bail!("unexpected argument {extra:?}");
    }
    Ok(parsed)
}

async fn run(command: Command) -> Result<()> {
    let config_path = ClientConfig::default_path();
    let config = ClientConfig::load(&config_path)
        .await
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(version = VERSION, base_url = %config.base_url, "Using backend");

    let client = SessionClient::new(config)?;
    let status = client.initialize().await;
    debug!(%status, "Session restored");

    match command {
        Command::Login { username } => {
            let password = std::env::var("SHOPDESK_PASSWORD")
                .context("SHOPDESK_PASSWORD must be set to log in")?;
            client
                .login(&Credentials::new(username, password))
                .await?;

            let user = client
                .session()
                .user()
                .await
                .ok_or_else(|| anyhow!("login finished without a session"))?;
            let route = user.role.map(|r| r.landing_route()).unwrap_or("/");
            println!("Signed in as {} ({})", user.username.as_deref().unwrap_or(&user.id), route);
        }
        Command::Whoami => {
            ensure_signed_in(status)?;
            let profile = fetch_profile(client.api()).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            println!("Landing route: {}", profile.landing_route());
        }
        Command::Get { path } => {
            ensure_signed_in(status)?;
            let body: Value = client.api().get_json(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Logout => {
            client.logout().await;
            println!("Signed out");
        }
        Command::Status => {
            println!("{status}");
        }
    }

    Ok(())
}

fn ensure_signed_in(status: SessionStatus) -> Result<()> {
    if status == SessionStatus::SignedOut {
        bail!("not signed in, run `shopdesk login <username>` first");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "shopdesk_lib=debug,shopdesk=debug,warn".into()
            } else {
                "shopdesk_lib=info,shopdesk=info,warn".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    run(command).await
}
