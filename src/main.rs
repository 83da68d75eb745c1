use std::io::IsTerminal as _;
use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use omni_mcp::{
    Config,
    cli::{AuthCommands, Cli, Commands, auth, output},
    core::mcp::{McpManager, McpResult},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    Config::load_env_file(cli.env_file.as_deref())?;
    let config = Config::load()?;
    let servers = config.load_servers(cli.config.as_deref())?;

    let mut auth_manager = config.auth_manager()?;
    if std::io::stdin().is_terminal() {
        auth_manager = auth_manager.with_handler(auth::PromptAuthorizationHandler::shared());
    }
    let manager = McpManager::new(servers, auth_manager).with_client_info(config.client_info());
    let json = cli.json;

    match cli.command {
        Commands::Servers { check } => {
            if check {
                for (name, result) in manager.connect_all().await {
                    if let Err(e) = result {
                        eprintln!("warning: {name}: {e}");
                    }
                }
            }
            let servers = manager.list_servers();
            if json {
                output::print_json(&servers)?;
            } else if servers.is_empty() {
                println!("No servers configured");
            } else {
                print!("{}", output::servers_table(&servers));
            }
        }

        Commands::Tools { server } => {
            connect(&manager, server.as_deref()).await?;
            let listing = manager.list_tools(server.as_deref()).await?;
            output::print_listing_errors(&listing);
            if json {
                output::print_json(&listing.items)?;
            } else {
                print!("{}", output::tools_table(&listing.items));
            }
        }

        Commands::Resources { server } => {
            connect(&manager, server.as_deref()).await?;
            let listing = manager.list_resources(server.as_deref()).await?;
            output::print_listing_errors(&listing);
            if json {
                output::print_json(&listing.items)?;
            } else {
                print!("{}", output::resources_table(&listing.items));
            }
        }

        Commands::Templates { server } => {
            connect(&manager, server.as_deref()).await?;
            let listing = manager.list_resource_templates(server.as_deref()).await?;
            output::print_listing_errors(&listing);
            if json {
                output::print_json(&listing.items)?;
            } else {
                print!("{}", output::templates_table(&listing.items));
            }
        }

        Commands::Prompts { server } => {
            connect(&manager, server.as_deref()).await?;
            let listing = manager.list_prompts(server.as_deref()).await?;
            output::print_listing_errors(&listing);
            if json {
                output::print_json(&listing.items)?;
            } else {
                print!("{}", output::prompts_table(&listing.items));
            }
        }

        Commands::Call { tool, server, args } => {
            let arguments = parse_arguments(&args)?;
            connect(&manager, server.as_deref()).await?;
            let result = match server {
                Some(server) => manager.call_tool(&server, &tool, arguments).await?,
                None => {
                    let (server, result) = manager.call_tool_any(&tool, arguments).await?;
                    tracing::info!(server = %server, tool = %tool, "tool routed");
                    result
                }
            };
            if json {
                output::print_json(&result)?;
            } else {
                println!("{}", result.text());
            }
            if result.is_error {
                anyhow::bail!("tool '{tool}' reported an error");
            }
        }

        Commands::Read { server, uri } => {
            connect(&manager, Some(server.as_str())).await?;
            let result = manager.read_resource(&server, &uri).await?;
            if json {
                output::print_json(&result)?;
            } else {
                println!("{}", output::resource_text(&result));
            }
        }

        Commands::Prompt { server, name, args } => {
            let arguments = parse_arguments(&args)?;
            connect(&manager, Some(server.as_str())).await?;
            let result = manager.get_prompt(&server, &name, arguments).await?;
            if json {
                output::print_json(&result)?;
            } else {
                print!("{}", output::prompt_text(&result));
            }
        }

        Commands::Auth { command } => match command {
            AuthCommands::Login { server } => auth::auth_login(&manager, &server).await?,
            AuthCommands::Logout { server } => auth::auth_logout(&manager, &server).await?,
            AuthCommands::Status { server } => {
                auth::auth_status(&manager, server.as_deref()).await?;
            }
        },
    }

    Ok(())
}

/// Connect one server, or every server (reporting the ones that fail).
async fn connect(manager: &McpManager, server: Option<&str>) -> McpResult<()> {
    match server {
        Some(server) => manager.connect(server).await,
        None => {
            for (name, result) in manager.connect_all().await {
                if let Err(e) = result {
                    eprintln!("warning: {name}: {e}");
                }
            }
            Ok(())
        }
    }
}

fn parse_arguments(raw: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| anyhow::anyhow!("arguments must be a JSON object: {e}"))?;
    if !value.is_object() {
        anyhow::bail!("arguments must be a JSON object");
    }
    Ok(value)
}
