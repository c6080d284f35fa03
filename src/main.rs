//! AppBuilder CLI - talk to hosted conversational apps

mod spinner;

use anyhow::{Context, Result};
use appbuilder::{
    api::{DescribeAppsRequest, GetAppListRequest},
    config::Config,
    AppBuilderClient, AppsClient,
};
use clap::{Parser, Subcommand};
use spinner::AnswerSpinner;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "appbuilder")]
#[command(about = "List apps, open conversations and run turns against AppBuilder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (default: APPBUILDER_LOGLEVEL or info)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Config file (default: ~/.config/appbuilder/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Secret key, overrides config and APPBUILDER_TOKEN
    #[arg(long, global = true)]
    token: Option<String>,

    /// Gateway URL, overrides config and GATEWAY_URL_V2
    #[arg(long, global = true)]
    gateway_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect hosted apps
    #[command(subcommand)]
    Apps(AppsCommands),

    /// Create a conversation and print its id
    Conversation {
        #[arg(short, long)]
        app_id: String,
    },

    /// Upload a local file into a conversation and print the file id
    Upload {
        #[arg(short, long)]
        app_id: String,

        #[arg(short = 'C', long)]
        conversation_id: String,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Run one conversational turn
    Run {
        #[arg(short, long)]
        app_id: String,

        /// Existing conversation (a new one is created when omitted)
        #[arg(short = 'C', long)]
        conversation_id: Option<String>,

        #[arg(short, long)]
        query: String,

        /// Uploaded file ids to attach
        #[arg(long = "file-id")]
        file_ids: Vec<String>,

        /// Stream answer fragments as they arrive
        #[arg(short, long)]
        stream: bool,

        /// Print each answer as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum AppsCommands {
    /// List apps
    List {
        #[arg(long, default_value = "10")]
        limit: u32,

        /// Return apps after this app id
        #[arg(long)]
        after: Option<String>,

        /// Return apps before this app id
        #[arg(long)]
        before: Option<String>,
    },

    /// Describe apps page by page
    Describe {
        #[arg(long)]
        max_keys: Option<u32>,

        #[arg(long)]
        marker: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level_name = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("APPBUILDER_LOGLEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    let log_level = match level_name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Config(ref cmd) => run_config_command(cmd, config_path(&cli)),
        Commands::Apps(ref cmd) => run_apps_command(cmd, load_config(&cli)?).await,
        Commands::Conversation { ref app_id } => {
            let client = AppBuilderClient::new(app_id.clone(), load_config(&cli)?)?;
            println!("{}", client.create_conversation().await?);
            Ok(())
        }
        Commands::Upload {
            ref app_id,
            ref conversation_id,
            ref file,
        } => {
            let client = AppBuilderClient::new(app_id.clone(), load_config(&cli)?)?;
            let file_id = client
                .upload_local_file(conversation_id, file)
                .await
                .with_context(|| format!("uploading {}", file.display()))?;
            println!("{}", file_id);
            Ok(())
        }
        Commands::Run {
            ref app_id,
            ref conversation_id,
            ref query,
            ref file_ids,
            stream,
            json,
        } => {
            let client = AppBuilderClient::new(app_id.clone(), load_config(&cli)?)?;
            run_turn(&client, conversation_id.clone(), query, file_ids.clone(), stream, json).await
        }
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(Config::default_path)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_from(config_path(cli))?;
    if let Some(token) = &cli.token {
        config.auth.secret_key = Some(token.clone());
    }
    if let Some(url) = &cli.gateway_url {
        config.service.gateway_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run_apps_command(cmd: &AppsCommands, config: Config) -> Result<()> {
    let client = AppsClient::new(config)?;

    match cmd {
        AppsCommands::List {
            limit,
            after,
            before,
        } => {
            let apps = client
                .list(GetAppListRequest {
                    limit: *limit,
                    after: after.clone(),
                    before: before.clone(),
                })
                .await?;

            for app in &apps {
                println!(
                    "{}  {}  [{}{}]",
                    app.id,
                    app.name,
                    app.app_type,
                    if app.is_published { ", published" } else { "" }
                );
            }
            info!("{} apps", apps.len());
        }
        AppsCommands::Describe { max_keys, marker } => {
            let response = client
                .describe(DescribeAppsRequest {
                    max_keys: *max_keys,
                    marker: marker.clone(),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

async fn run_turn(
    client: &AppBuilderClient,
    conversation_id: Option<String>,
    query: &str,
    file_ids: Vec<String>,
    stream: bool,
    json: bool,
) -> Result<()> {
    let conversation_id = match conversation_id {
        Some(id) => id,
        None => {
            let id = client.create_conversation().await?;
            info!("Created conversation {}", id);
            id
        }
    };

    let mut spinner = AnswerSpinner::waiting("Waiting for answer...");

    let mut answers = client.run(&conversation_id, query, file_ids, stream).await?;
    let mut stdout = std::io::stdout();

    while let Some(answer) = answers.next().await? {
        spinner.answered();

        if json {
            println!("{}", serde_json::to_string(&answer)?);
            continue;
        }

        print!("{}", answer.answer);
        stdout.flush()?;
        for call in answer.tool_calls() {
            eprintln!(
                "\n[tool call {}] {}({})",
                call.id, call.function.name, call.function.arguments
            );
        }
    }
    spinner.answered();

    if !json {
        println!();
    }
    info!(
        "Conversation {} (request {})",
        conversation_id,
        answers.request_id()
    );

    Ok(())
}

fn run_config_command(cmd: &ConfigCommands, path: PathBuf) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save_to(path.clone())?;

            println!("Configuration file created at: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Edit the config file to add your secret key, or");
            println!("  2. Set the environment variable:");
            println!("     export APPBUILDER_TOKEN=your_secret_key");
        }
        ConfigCommands::Show => {
            let mut config = Config::load_from(path)?;
            // Mask the key in display
            if config.auth.secret_key.is_some() {
                config.auth.secret_key = Some("***".to_string());
            }
            println!("{}", toml::to_string_pretty(&config)?);

            println!("\n--- Environment Variables ---");
            for name in [
                "APPBUILDER_TOKEN",
                "GATEWAY_URL_V2",
                "CONSOLE_OPENAPI_VERSION",
                "CONSOLE_OPENAPI_PREFIX",
                "SECRET_KEY_PREFIX",
            ] {
                let status = if std::env::var(name).is_ok() { "set" } else { "not set" };
                println!("{}: {}", name, status);
            }
        }
        ConfigCommands::Path => {
            println!("{}", path.display());

            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist - run 'config init' to create)");
            }
        }
        ConfigCommands::Validate => {
            let config = Config::load_from(path)?;
            match config.validate() {
                Ok(()) => {
                    println!("Configuration is valid!");
                    println!("Gateway: {}", config.service_url("")?);
                }
                Err(e) => {
                    println!("Configuration validation failed:");
                    println!("  {}", e);
                    println!();
                    println!("To fix, set the environment variable: export APPBUILDER_TOKEN=your_key");
                }
            }
        }
    }

    Ok(())
}
