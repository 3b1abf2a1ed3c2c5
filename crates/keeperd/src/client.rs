//! Command lines for the engine's client tools.

use std::path::Path;

use crate::process::Invocation;

/// Maintenance database every cluster has.
pub(crate) const MAINTENANCE_DATABASE: &str = "postgres";

/// `psql` running a single statement against `database` over the socket.
pub(crate) fn statement(socket_dir: &Path, database: &str, sql: &str) -> Invocation {
    Invocation::new([
        "psql".to_owned(),
        "-d".to_owned(),
        database.to_owned(),
        "-h".to_owned(),
        socket_dir.display().to_string(),
        "-c".to_owned(),
        sql.to_owned(),
    ])
}

/// `pg_dump` of `database` connecting as `user`; output goes to stdout.
pub(crate) fn dump(socket_dir: &Path, user: &str, database: &str) -> Invocation {
    Invocation::new([
        "pg_dump".to_owned(),
        "-h".to_owned(),
        socket_dir.display().to_string(),
        "-U".to_owned(),
        user.to_owned(),
        "-d".to_owned(),
        database.to_owned(),
    ])
}

/// `psql` replaying a script from stdin, stopping at the first error.
pub(crate) fn replay(socket_dir: &Path, user: &str, database: &str) -> Invocation {
    Invocation::new([
        "psql".to_owned(),
        "-v".to_owned(),
        "ON_ERROR_STOP=1".to_owned(),
        "-h".to_owned(),
        socket_dir.display().to_string(),
        "-U".to_owned(),
        user.to_owned(),
        "-d".to_owned(),
        database.to_owned(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_places_sql_last() {
        let invocation = statement(Path::new("/run/pg"), "shop", "SELECT 1");
        assert_eq!(
            invocation.argv(),
            ["psql", "-d", "shop", "-h", "/run/pg", "-c", "SELECT 1"]
        );
    }

    #[test]
    fn replay_stops_on_error() {
        let invocation = replay(Path::new("/run/pg"), "bob", "shop");
        assert!(invocation.argv().iter().any(|arg| arg == "ON_ERROR_STOP=1"));
        assert_eq!(invocation.program(), Some("psql"));
    }
}
