//! Identity of the OS account the engine runs as.

use std::fmt;

/// OS user and group owning the engine's files and processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    user: String,
    uid: u32,
    group: String,
    gid: u32,
}

impl ServiceAccount {
    /// Builds an account from explicit names and ids.
    #[must_use]
    pub fn new(user: impl Into<String>, uid: u32, group: impl Into<String>, gid: u32) -> Self {
        Self {
            user: user.into(),
            uid,
            group: group.into(),
            gid,
        }
    }

    /// Login name of the account.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Numeric user id.
    #[must_use]
    pub const fn uid(&self) -> u32 {
        self.uid
    }

    /// Primary group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Numeric group id.
    #[must_use]
    pub const fn gid(&self) -> u32 {
        self.gid
    }
}

impl fmt::Display for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):{}({})", self.user, self.uid, self.group, self.gid)
    }
}
