//! Warden - directory authentication connector
//!
//! Checks credentials and looks up group memberships against LDAP or
//! Active Directory servers described in a configuration file.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use warden_auth::{AuthResult, Connector, Registry};
use warden_core::{RealmName, WardenConfig};

#[derive(Parser)]
#[command(name = "warden")]
#[command(author = "Warden Team")]
#[command(version = warden_core::VERSION)]
#[command(about = "Directory authentication connector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Realm to use; the default realm when omitted
    #[arg(short, long, global = true, env = "WARDEN_REALM")]
    realm: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "WARDEN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a login and password
    Authenticate {
        /// Login as typed by the user
        login: String,

        /// Password
        #[arg(short, long, env = "WARDEN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// List the groups of a user DN
    Groups {
        /// Distinguished name of the user
        user_dn: String,
    },

    /// Validate the configuration and show the configured realms
    CheckConfig,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => WardenConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => WardenConfig::from_env(),
    };

    init_logging(&cli, &config);

    let realm = cli.realm.as_deref();

    match &cli.command {
        Commands::Version => {
            println!("warden {}", warden_core::VERSION);
        }
        Commands::CheckConfig => {
            check_config(&config)?;
        }
        Commands::Authenticate { login, password } => {
            let Some(password) = password else {
                bail!("No password given: use --password or WARDEN_PASSWORD");
            };
            let connector = connector(&config, realm)?;
            if !authenticate(&connector, login, password, cli.json).await? {
                std::process::exit(1);
            }
        }
        Commands::Groups { user_dn } => {
            let connector = connector(&config, realm)?;
            if !groups(&connector, user_dn, cli.json).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli, config: &WardenConfig) {
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json = config.logging.format.eq_ignore_ascii_case("json");
    let (json_layer, pretty_layer) = if json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (
            None,
            Some(fmt::layer().with_target(true).with_writer(std::io::stderr)),
        )
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(pretty_layer)
        .with(filter)
        .init();
}

fn connector(config: &WardenConfig, realm: Option<&str>) -> anyhow::Result<Connector> {
    let registry = Arc::new(Registry::from_config(&config.ldap)?);
    debug!("Using realm {}", RealmName(realm));
    Ok(registry.connector(realm)?)
}

async fn authenticate(
    connector: &Connector,
    login: &str,
    password: &str,
    as_json: bool,
) -> anyhow::Result<bool> {
    let result = connector.authenticate(login, password).await?;

    match &result {
        AuthResult::Authenticated { dn, attributes } => {
            info!("Authenticated {} as {}", login, dn);
            if as_json {
                let binary: serde_json::Map<String, serde_json::Value> = attributes
                    .iter_binary()
                    .map(|(name, values)| {
                        let values: Vec<String> = values.iter().map(|v| hex(v)).collect();
                        (name.clone(), json!(values))
                    })
                    .collect();
                let out = json!({
                    "status": "authenticated",
                    "dn": dn,
                    "attributes": attributes,
                    "binary_attributes": binary,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("authenticated: {}", dn);
                for (name, values) in attributes.iter() {
                    for value in values {
                        println!("  {}: {}", name, value);
                    }
                }
                for (name, values) in attributes.iter_binary() {
                    for value in values {
                        println!("  {}:: {}", name, hex(value));
                    }
                }
            }
        }
        AuthResult::Denied => {
            info!("Authentication denied for {}", login);
            if as_json {
                println!("{}", json!({ "status": "denied" }));
            } else {
                println!("denied");
            }
        }
    }

    Ok(result.is_authenticated())
}

async fn groups(connector: &Connector, user_dn: &str, as_json: bool) -> anyhow::Result<bool> {
    let Some(groups) = connector.list_groups(user_dn).await? else {
        if as_json {
            println!("{}", json!({ "status": "failed" }));
        } else {
            eprintln!("group lookup failed for {}", user_dn);
        }
        return Ok(false);
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
    } else if groups.is_empty() {
        println!("no groups");
    } else {
        for group in &groups {
            println!("{}", group.dn);
        }
    }

    Ok(true)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn check_config(config: &WardenConfig) -> anyhow::Result<()> {
    config.ldap.validate()?;
    let registry = Registry::from_config(&config.ldap)?;

    if registry.realms().is_empty() {
        bail!("No LDAP realms configured");
    }

    for (name, realm) in config.ldap.iter() {
        println!("realm {}", RealmName(name));
        println!("  uri: {}", realm.uri.to_vec().join(" "));
        println!(
            "  bind: {}",
            realm.bind.as_deref().unwrap_or("<anonymous>")
        );
        match registry.login_query(name) {
            Some(query) => println!("  login query: {}", query),
            None => println!("  login query: <none>"),
        }
        match registry.groups_query(name) {
            Some(query) => println!("  groups query: {}", query),
            None => println!("  groups query: <none>"),
        }
    }

    Ok(())
}
