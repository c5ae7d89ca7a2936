//! Coroconf CLI - edit corosync.conf, manage knet links and migrate legacy clusters.

use clap::Parser;
use coroconf::cli::{Cli, Commands, LinkCommands, NodeCommands};
use coroconf::commands::{self, CommandResult};
use coroconf::config::{LOG_ENV, LOG_FORMAT_ENV, Settings, SettingsOverrides};
use std::env;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    init_logging();

    let result = Settings::resolve(&overrides(&cli)).and_then(|settings| {
        tracing::debug!(
            conf = %settings.conf_path.value.display(),
            source = %settings.conf_path.source,
            node = %settings.node_name.value,
            "Resolved settings"
        );
        run_command(cli.command, &settings, human)
    });

    if let Err(e) = result {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Logs go to stderr so they never mix with command output.
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if env::var(LOG_FORMAT_ENV).is_ok_and(|v| v == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn overrides(cli: &Cli) -> SettingsOverrides {
    let mut overrides = SettingsOverrides::new();
    if let Some(path) = &cli.conf_path {
        overrides = overrides.with_conf_path(path);
    }
    if let Some(path) = &cli.cib_path {
        overrides = overrides.with_cib_path(path);
    }
    if let Some(name) = &cli.node_name {
        overrides = overrides.with_node_name(name);
    }
    if let Some(secs) = cli.peer_timeout {
        overrides = overrides.with_peer_timeout_secs(secs);
    }
    overrides
}

fn run_command(command: Commands, settings: &Settings, human: bool) -> coroconf::Result<()> {
    match command {
        Commands::Get { path, index, all } => {
            if all {
                output(&commands::get_all(settings, &path)?, human);
            } else {
                output(&commands::get(settings, &path, index)?, human);
            }
        }
        Commands::Set { path, value, index } => {
            output(&commands::set(settings, &path, &value, index)?, human);
        }
        Commands::Remove { path, index } => {
            output(&commands::remove(settings, &path, index)?, human);
        }
        Commands::Paths => output(&commands::paths(settings)?, human),
        Commands::Validate => output(&commands::validate(settings)?, human),
        Commands::Init { force } => output(&commands::init(settings, force)?, human),

        Commands::Link { command } => match command {
            LinkCommands::Show => output(&commands::link_show(settings)?, human),
            LinkCommands::Add { addrs, options } => {
                output(&commands::link_add(settings, &addrs, &options)?, human);
            }
            LinkCommands::Remove { linknumber } => {
                output(&commands::link_remove(settings, linknumber)?, human);
            }
            LinkCommands::Update {
                linknumber,
                options,
            } => {
                output(&commands::link_update(settings, linknumber, &options)?, human);
            }
            LinkCommands::SetAddr { linknumber, addrs } => {
                output(&commands::link_set_addr(settings, linknumber, &addrs)?, human);
            }
        },

        Commands::Node { command } => match command {
            NodeCommands::Add { name, addrs } => {
                output(&commands::node_add(settings, &name, &addrs)?, human);
            }
            NodeCommands::Remove { addr } => {
                output(&commands::node_remove(settings, &addr)?, human);
            }
            NodeCommands::FreeId => output(&commands::node_free_id(settings)?, human),
        },

        Commands::Migrate { check } => {
            if check {
                output(&commands::migrate_check(settings)?, human);
            } else {
                output(&commands::migrate(settings)?, human);
            }
        }
        Commands::Push { hosts } => output(&commands::push(settings, &hosts)?, human),
        Commands::Pull { host } => output(&commands::pull(settings, &host)?, human),
        Commands::Diff { hosts } => output(&commands::diff(settings, &hosts)?, human),
    }
    Ok(())
}

fn output<T: CommandResult>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
