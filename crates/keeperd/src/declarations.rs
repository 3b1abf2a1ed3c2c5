//! Credential and database declarations read from the environment.
//!
//! `DB_PASSWORD_<name>=<password>` declares a login role and
//! `DB_OWNER_<name>=<owner>` declares a database owned by `<owner>`. Names are
//! lower-cased so they match the engine's folding of unquoted identifiers.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;

use tracing::warn;

const DECLARATIONS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::declarations");
const DECLARATION_PREFIX: &str = "DB_";
const PASSWORD_PREFIX: &str = "DB_PASSWORD_";
const OWNER_PREFIX: &str = "DB_OWNER_";

/// A role to provision.
#[derive(Clone, PartialEq, Eq)]
pub struct UserDeclaration {
    /// Role name.
    pub username: String,
    /// Clear-text password; hashed before it reaches the engine.
    pub password: String,
}

impl fmt::Debug for UserDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDeclaration")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A database to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseDeclaration {
    /// Database name.
    pub database: String,
    /// Owning role.
    pub owner: String,
}

/// Every declaration found in one environment snapshot, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declarations {
    users: Vec<UserDeclaration>,
    databases: Vec<DatabaseDeclaration>,
}

impl Declarations {
    /// Scans `vars` for declaration variables.
    ///
    /// When two variables fold to the same name, the one seen last wins.
    pub fn from_env<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut users = BTreeMap::new();
        let mut databases = BTreeMap::new();
        for (key, value) in vars {
            let key = key.as_ref();
            if let Some(name) = declared_name(key, PASSWORD_PREFIX) {
                users.insert(name, value.into());
            } else if let Some(name) = declared_name(key, OWNER_PREFIX) {
                databases.insert(name, value.into());
            }
        }
        Self {
            users: users
                .into_iter()
                .map(|(username, password)| UserDeclaration { username, password })
                .collect(),
            databases: databases
                .into_iter()
                .map(|(database, owner)| DatabaseDeclaration { database, owner })
                .collect(),
        }
    }

    /// Scans raw environment entries, skipping any that are not valid UTF-8.
    ///
    /// A skipped entry whose name looks like a declaration is logged, since
    /// the role or database it names will not be provisioned.
    pub fn from_os_env<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        Self::from_env(vars.into_iter().filter_map(|(key, value)| {
            match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (key, _) => {
                    let name = match &key {
                        Ok(key) => key.clone(),
                        Err(raw) => raw.to_string_lossy().into_owned(),
                    };
                    if name.starts_with(DECLARATION_PREFIX) {
                        warn!(
                            target: DECLARATIONS_TARGET,
                            variable = %name,
                            "ignoring declaration that is not valid UTF-8"
                        );
                    }
                    None
                }
            }
        }))
    }

    /// Declared roles, sorted by name.
    #[must_use]
    pub fn users(&self) -> &[UserDeclaration] {
        &self.users
    }

    /// Declared databases, sorted by name.
    #[must_use]
    pub fn databases(&self) -> &[DatabaseDeclaration] {
        &self.databases
    }

    /// Whether nothing was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.databases.is_empty()
    }
}

fn declared_name(key: &str, prefix: &str) -> Option<String> {
    key.strip_prefix(prefix)
        .filter(|suffix| !suffix.is_empty())
        .map(str::to_lowercase)
}
