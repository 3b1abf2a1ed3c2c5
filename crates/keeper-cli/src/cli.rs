//! Command-line surface of the `keeper` binary.

use clap::{Args, Parser, Subcommand};
use keeper_config::ServiceSettings;

/// Lifecycle and administration tool for a containerised PostgreSQL service.
#[derive(Parser, Debug)]
#[command(name = "keeper", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Service settings, usually supplied through the environment.
    #[command(flatten)]
    pub(crate) settings: ServiceSettings,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Operations understood by `keeper`.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Replaces the process with an interactive shell as an OS user.
    Bash {
        /// Account to switch to; defaults to the service account.
        user: Option<String>,
    },
    /// Provisions the service and runs the engine in the foreground.
    Start,
    /// Provisions the service without leaving the engine running.
    Init,
    /// Starts the engine once to clear a stale lock file, then stops it.
    Repair,
    /// Creates a login role.
    #[command(name = "createuser")]
    CreateUser(Credentials),
    /// Replaces the password of an existing role.
    #[command(name = "setpwd")]
    SetPassword(Credentials),
    /// Creates a database owned by an existing role.
    #[command(name = "createdb")]
    CreateDatabase {
        /// Database to create.
        #[arg(long)]
        database: String,
        /// Owning role.
        #[arg(long)]
        owner: String,
    },
    /// Creates a schema inside an existing database.
    #[command(name = "createschema")]
    CreateSchema {
        /// Database holding the schema.
        #[arg(long)]
        database: String,
        /// Schema to create.
        #[arg(long)]
        schema: String,
        /// Owning role.
        #[arg(long)]
        owner: String,
    },
    /// Dumps a database into a named artifact.
    Backup(ArtifactTarget),
    /// Replaces a database with the contents of a named artifact.
    Restore {
        /// Artifact and target database.
        #[command(flatten)]
        target: ArtifactTarget,
        /// Drops the target without saving its current contents first.
        #[arg(long)]
        skip_safety_backup: bool,
    },
}

/// Role name and clear-text password.
#[derive(Args, Debug, Clone)]
pub(crate) struct Credentials {
    /// Role name.
    #[arg(long)]
    pub(crate) username: String,
    /// Clear-text password; only its md5 hash reaches the engine.
    #[arg(long)]
    pub(crate) password: String,
}

/// Backup artifact name plus the database it belongs to.
#[derive(Args, Debug, Clone)]
pub(crate) struct ArtifactTarget {
    /// Artifact name: lowercase letters, digits, `_` and `-`.
    #[arg(long)]
    pub(crate) name: String,
    /// Role used to connect.
    #[arg(long)]
    pub(crate) user: String,
    /// Database to dump or restore.
    #[arg(long)]
    pub(crate) database: String,
}
