//! Administrative statements executed against the live engine.
//!
//! Each operation opens its own [`ServiceSupervisor::with_service`] scope, so
//! it works whether or not the engine is already running; inside an enclosing
//! scope it reuses the engine that scope provides.

use std::fmt;

use md5::{Digest, Md5};
use thiserror::Error;
use tracing::info;

use crate::client;
use crate::process::ProcessError;
use crate::supervisor::{ServiceSupervisor, SupervisorError};

const ADMIN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::admin");

/// Exit status `psql` reports when a statement fails on the server.
const STATEMENT_ERROR: i32 = 1;

/// Kind of database object an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Login role.
    User,
    /// Database.
    Database,
    /// Schema inside a database.
    Schema,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Database => "database",
            Self::Schema => "schema",
        })
    }
}

/// Errors raised by administrative operations.
#[derive(Debug, Clone, Error)]
pub enum AdminError {
    /// The statement failed, which for create statements means the object
    /// is already present.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Kind of object.
        kind: ObjectKind,
        /// Name of the object.
        name: String,
    },
    /// The client tool exited with an unexpected status.
    #[error("{action} failed: client exited with status {code:?}")]
    ClientFailed {
        /// Description of the attempted operation.
        action: String,
        /// Exit code, when the client exited normally.
        code: Option<i32>,
    },
    /// A name is not a plain SQL identifier.
    #[error("'{value}' is not a valid {kind} name")]
    InvalidIdentifier {
        /// Kind of object being named.
        kind: ObjectKind,
        /// Rejected value.
        value: String,
    },
    /// The engine could not be made available.
    #[error(transparent)]
    Service(#[from] SupervisorError),
    /// The client tool could not be run.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Role, database and schema management.
#[derive(Clone, Copy)]
pub struct AdminOperations<'a> {
    supervisor: &'a ServiceSupervisor,
}

impl<'a> AdminOperations<'a> {
    /// Builds the operations on top of `supervisor`.
    #[must_use]
    pub const fn new(supervisor: &'a ServiceSupervisor) -> Self {
        Self { supervisor }
    }

    /// Creates a login role with an md5-hashed password.
    pub fn create_user(&self, user: &str, password: &str) -> Result<(), AdminError> {
        validate_identifier(ObjectKind::User, user)?;
        let sql = format!(
            "CREATE USER {user} WITH PASSWORD '{}'",
            password_hash(user, password)
        );
        self.create(ObjectKind::User, user, client::MAINTENANCE_DATABASE, &sql)
    }

    /// Replaces the password of an existing role.
    pub fn set_password(&self, user: &str, password: &str) -> Result<(), AdminError> {
        validate_identifier(ObjectKind::User, user)?;
        let sql = format!(
            "ALTER USER {user} WITH PASSWORD '{}'",
            password_hash(user, password)
        );
        self.execute(
            &format!("set password for user '{user}'"),
            client::MAINTENANCE_DATABASE,
            &sql,
        )
    }

    /// Creates a UTF-8 database owned by `owner`.
    pub fn create_database(&self, database: &str, owner: &str) -> Result<(), AdminError> {
        validate_identifier(ObjectKind::Database, database)?;
        validate_identifier(ObjectKind::User, owner)?;
        let sql = format!("CREATE DATABASE {database} WITH ENCODING 'UTF8' OWNER {owner}");
        self.create(
            ObjectKind::Database,
            database,
            client::MAINTENANCE_DATABASE,
            &sql,
        )
    }

    /// Creates `schema` inside `database`, owned by `owner`.
    pub fn create_schema(
        &self,
        database: &str,
        schema: &str,
        owner: &str,
    ) -> Result<(), AdminError> {
        validate_identifier(ObjectKind::Database, database)?;
        validate_identifier(ObjectKind::Schema, schema)?;
        validate_identifier(ObjectKind::User, owner)?;
        let sql = format!("CREATE SCHEMA {schema} AUTHORIZATION {owner}");
        self.create(ObjectKind::Schema, schema, database, &sql)
    }

    /// Drops `database` if it exists.
    pub fn drop_database(&self, database: &str) -> Result<(), AdminError> {
        validate_identifier(ObjectKind::Database, database)?;
        self.execute(
            &format!("drop database '{database}'"),
            client::MAINTENANCE_DATABASE,
            &format!("DROP DATABASE IF EXISTS {database}"),
        )
    }

    /// Transfers ownership of `database` to `owner`.
    pub fn alter_database_owner(&self, database: &str, owner: &str) -> Result<(), AdminError> {
        validate_identifier(ObjectKind::Database, database)?;
        validate_identifier(ObjectKind::User, owner)?;
        self.execute(
            &format!("change owner of database '{database}'"),
            client::MAINTENANCE_DATABASE,
            &format!("ALTER DATABASE {database} OWNER TO {owner}"),
        )
    }

    fn create(
        &self,
        kind: ObjectKind,
        name: &str,
        database: &str,
        sql: &str,
    ) -> Result<(), AdminError> {
        let code = self.run(database, sql)?;
        match code {
            Some(0) => {
                info!(target: ADMIN_TARGET, kind = %kind, name, "created");
                Ok(())
            }
            Some(STATEMENT_ERROR) => Err(AdminError::AlreadyExists {
                kind,
                name: name.to_owned(),
            }),
            code => Err(AdminError::ClientFailed {
                action: format!("create {kind} '{name}'"),
                code,
            }),
        }
    }

    fn execute(&self, action: &str, database: &str, sql: &str) -> Result<(), AdminError> {
        match self.run(database, sql)? {
            Some(0) => {
                info!(target: ADMIN_TARGET, action, "statement applied");
                Ok(())
            }
            code => Err(AdminError::ClientFailed {
                action: action.to_owned(),
                code,
            }),
        }
    }

    /// Runs one statement inside a service scope and returns the exit code.
    fn run(&self, database: &str, sql: &str) -> Result<Option<i32>, AdminError> {
        let config = self.supervisor.config();
        self.supervisor.with_service(|| {
            let invocation = client::statement(config.paths().socket_dir(), database, sql)
                .as_account(config.account());
            let status = self.supervisor.runner().status(invocation)?;
            Ok(status.code())
        })
    }
}

/// Engine-compatible md5 password: `"md5"` followed by the hex digest of the
/// password concatenated with the user name.
#[must_use]
pub fn password_hash(user: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(3 + digest.len() * 2);
    out.push_str("md5");
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(kind: ObjectKind, value: &str) -> Result<(), AdminError> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AdminError::InvalidIdentifier {
            kind,
            value: value.to_owned(),
        })
    }
}
