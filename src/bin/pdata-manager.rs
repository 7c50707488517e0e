//! Admin CLI for user management (spec §10.4), mirroring
//! `proxmox-backup-manager`'s one-subcommand-per-operation shape. Contains
//! no core logic: argument parsing, a table-formatted printer, and process
//! exit codes only.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use pdata::PDataConfig;
use pdata_api_types::PDataError;
use pdata_config::CredentialStore;

#[derive(Parser)]
#[command(name = "pdata-manager", about = "Administer pdata users and roles")]
struct Cli {
    #[command(subcommand)]
    command: UserCommand,
}

#[derive(Subcommand)]
enum UserCommand {
    /// Manage users and their role assignments.
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a new user.
    Add { username: String, password: String, role: String },
    /// Change a user's password.
    Passwd { username: String, new_password: String },
    /// Grant an additional role to a user.
    SetRole { username: String, role: String },
    /// Remove a user.
    Remove { username: String },
    /// List all users.
    List,
}

fn run(cli: Cli) -> Result<(), PDataError> {
    let config = PDataConfig::from_env().map_err(PDataError::InvalidInput)?;
    let store = CredentialStore::open(&config.db_root, config.allowed_roles.clone())?;

    let UserCommand::User { action } = cli.command;
    match action {
        UserAction::Add { username, password, role } => {
            store.add(&username, &password, &role)?;
            println!("added user {username}");
        }
        UserAction::Passwd { username, new_password } => {
            store.update_password(&username, &new_password)?;
            println!("updated password for {username}");
        }
        UserAction::SetRole { username, role } => {
            store.set_role(&username, &role)?;
            println!("granted role {role} to {username}");
        }
        UserAction::Remove { username } => {
            store.delete(&username)?;
            println!("removed user {username}");
        }
        UserAction::List => {
            for user in store.list_users() {
                let roles: Vec<String> = store.get_roles(&user).into_iter().collect();
                println!("{user}\t{}", roles.join(","));
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pdata-manager: {err}");
            ExitCode::FAILURE
        }
    }
}
