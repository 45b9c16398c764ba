//! Command-line control interface for the Apollo extension directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use apollo_directory::{settings::env_vars, Directory, DirectoryPaths, LineRecord};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::json;

/// Apollo - manage the extension lines of a Coventry phone exchange.
#[derive(Parser, Debug)]
#[command(name = "apollo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Directory holding coventry.conf.
    #[arg(long, global = true, env = env_vars::ETC_PREFIX)]
    etc: Option<PathBuf>,

    /// Exchange working directory (overlays, ipc.json).
    #[arg(long, global = true, env = env_vars::WORKING_DIR)]
    prefix: Option<PathBuf>,

    /// Vendor defaults file.
    #[arg(long, global = true, env = env_vars::DEFAULTS_FILE)]
    defaults: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List every provisioned line.
    Lines,
    /// Show one line.
    Show { id: u32 },
    /// Report the next free extension number.
    Allocate,
    /// Provision a line under a chosen number.
    Add {
        id: u32,
        #[command(flatten)]
        fields: LineFields,
        /// Initial line password.
        #[arg(long)]
        password: Option<String>,
    },
    /// Change fields of an existing line.
    Edit {
        id: u32,
        #[command(flatten)]
        fields: LineFields,
    },
    /// Set a line password.
    Passwd { id: u32, password: String },
    /// Remove a line's overlay record.
    Remove { id: u32 },
    /// List groups.
    Groups,
    /// List access policies and groups.
    Policies,
    /// Show one group or policy.
    Group { id: String },
    /// Resolve a bearer token to its extension.
    Verify { token: String },
    /// Store a site setting.
    Set {
        section: String,
        key: String,
        value: String,
    },
    /// Create the web administrator.
    Setup { admin: String, password: String },
    /// Reload configuration and the registry once.
    Reload,
    /// Stay running and reload on SIGHUP.
    Watch,
}

/// Editable line fields.
#[derive(ClapArgs, Debug, Default)]
struct LineFields {
    /// Display name.
    #[arg(long)]
    display: Option<String>,
    /// Line type.
    #[arg(long = "type")]
    line_type: Option<String>,
    /// Number of simultaneous calls.
    #[arg(long)]
    lines: Option<u16>,
    /// Caller id.
    #[arg(long)]
    caller: Option<String>,
    /// Contact email.
    #[arg(long)]
    email: Option<String>,
    /// Cabling label.
    #[arg(long)]
    cabling: Option<String>,
    /// Physical location.
    #[arg(long)]
    location: Option<String>,
}

impl LineFields {
    fn into_record(self) -> LineRecord {
        LineRecord {
            display: self.display,
            line_type: self.line_type,
            lines: self.lines,
            caller: self.caller,
            email: self.email,
            cabling: self.cabling,
            location: self.location,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let paths = directory_paths(&args);
    let directory = Directory::open(paths)
        .map_err(|e| anyhow!("cannot open extension directory: {}", e))?;
    run(Arc::new(directory), args.command).await
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("APOLLO_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "apollo=debug" } else { "apollo=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries command output
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init();
    }
}

fn directory_paths(args: &Args) -> DirectoryPaths {
    let mut paths = DirectoryPaths::from_env();
    if let Some(etc) = &args.etc {
        paths.etc_prefix = etc.clone();
    }
    if let Some(prefix) = &args.prefix {
        paths.working_dir = prefix.clone();
    }
    if let Some(defaults) = &args.defaults {
        paths.defaults_file = defaults.clone();
    }
    paths
}

fn print(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run(directory: Arc<Directory>, command: Command) -> Result<()> {
    match command {
        Command::Lines => print(serde_json::to_value(directory.list())?),
        Command::Show { id } => {
            let line = directory
                .get(id)
                .ok_or_else(|| anyhow!("extension {} not found", id))?;
            print(json!({ "id": id, "editable": line.editable, "line": line }))
        }
        Command::Allocate => match directory.allocate() {
            Some((id, line)) => print(json!({ "id": id, "line": line })),
            None => print(json!({ "id": 0 })),
        },
        Command::Add {
            id,
            fields,
            password,
        } => {
            let mut record = fields.into_record();
            if let Some(password) = password {
                let identity = directory.identity();
                record.set_credentials(identity.algorithms.credentials(
                    &id.to_string(),
                    &identity.realm,
                    &password,
                ));
            }
            directory.provision(id, &record)?;
            print(json!({ "id": id, "status": "added" }))
        }
        Command::Edit { id, fields } => {
            let current = directory
                .get(id)
                .ok_or_else(|| anyhow!("extension {} not found", id))?;
            let mut saved = directory.saved_snapshot(id).unwrap_or_default();
            saved.record_changes(&current, &fields.into_record());
            directory.update(id, &saved)?;
            print(json!({ "id": id, "status": "updated" }))
        }
        Command::Passwd { id, password } => {
            if !directory.exists(id) {
                return Err(anyhow!("extension {} not found", id));
            }
            directory.change_password(id, &password)?;
            print(json!({ "id": id, "status": "password changed" }))
        }
        Command::Remove { id } => {
            directory.remove(id)?;
            print(json!({ "id": id, "status": "removed" }))
        }
        Command::Groups => print(serde_json::to_value(directory.all_groups())?),
        Command::Policies => print(serde_json::to_value(directory.all_policies())?),
        Command::Group { id } => {
            let group = directory
                .policy(&id)
                .ok_or_else(|| anyhow!("group {} not found", id))?;
            print(json!({ "id": id, "group": group }))
        }
        Command::Verify { token } => {
            let extension = directory.verify_token(&token);
            print(json!({ "extension": extension, "valid": extension != 0 }))
        }
        Command::Set {
            section,
            key,
            value,
        } => {
            directory.set_setting(&section, &key, &value)?;
            directory.save_settings()?;
            print(json!({ "section": section, "key": key, "status": "saved" }))
        }
        Command::Setup { admin, password } => {
            directory.setup_admin(&admin, &password)?;
            print(json!({ "admin": admin, "status": "configured" }))
        }
        Command::Reload => {
            directory.reload()?;
            print(json!({
                "status": "reloaded",
                "lines": directory.count(),
                "registry": directory.registry_available(),
            }))
        }
        Command::Watch => watch(directory).await,
    }
}

#[cfg(unix)]
async fn watch(directory: Arc<Directory>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let (trigger, listener) = apollo_directory::spawn_reload_listener(directory);
    let mut hangup = signal(SignalKind::hangup())?;
    tracing::info!(category = "watch", "waiting for SIGHUP");

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                tracing::debug!(category = "watch", "hangup received");
                trigger.request()?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    listener.abort();
    Ok(())
}

#[cfg(not(unix))]
async fn watch(_directory: Arc<Directory>) -> Result<()> {
    Err(anyhow!("watch requires hangup signals"))
}
