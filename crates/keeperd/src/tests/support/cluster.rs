//! In-memory stand-in for the engine and its client tools.
//!
//! `status` interprets the SQL the orchestrator emits and keeps roles,
//! databases and database contents in memory; `spawn` starts a real `sh`
//! child that prints engine-like diagnostics so readiness detection and
//! process teardown run for real.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus};
use std::sync::{Mutex, MutexGuard};

use crate::process::{CommandRunner, Invocation, ProcessError, ProcessHandle};

/// Engine that reports readiness, then idles until terminated.
pub const READY_ENGINE: &str = "trap 'exit 0' TERM; \
     echo 'LOG:  database system is ready to accept connections' >&2; \
     while :; do sleep 1; done";

/// Engine that fails because another instance holds the lock.
pub const LOCKED_ENGINE: &str =
    "echo 'FATAL:  lock file \"postmaster.pid\" already exists' >&2; exit 1";

/// Engine that fails on a configuration problem.
pub const BROKEN_ENGINE: &str = "echo 'LOG:  starting PostgreSQL' >&2; \
     echo 'FATAL:  could not open configuration file' >&2; exit 1";

/// A command the cluster was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    /// Full command line.
    pub argv: Vec<String>,
    /// Account the command was to run as.
    pub account: Option<String>,
}

impl Recorded {
    /// Program name.
    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }

    /// SQL passed to `psql` with `-c`, if any.
    pub fn sql(&self) -> Option<&str> {
        if self.program() != "psql" {
            return None;
        }
        flag(&self.argv, "-c")
    }
}

#[derive(Debug, Clone, Default)]
struct Database {
    owner: String,
    contents: String,
}

#[derive(Debug)]
struct ClusterState {
    users: BTreeMap<String, String>,
    databases: BTreeMap<String, Database>,
    schemas: BTreeSet<(String, String)>,
    reachable: bool,
    fail_dumps: bool,
    fail_replays: bool,
    initdb_code: i32,
    engine_script: String,
}

/// Fake engine installation implementing [`CommandRunner`].
#[derive(Debug)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    invocations: Mutex<Vec<Recorded>>,
    spawned: Mutex<Vec<u32>>,
}

impl FakeCluster {
    /// Cluster holding only the bootstrap superuser `postgres`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState {
                users: BTreeMap::from([("postgres".to_owned(), String::new())]),
                databases: BTreeMap::new(),
                schemas: BTreeSet::new(),
                reachable: true,
                fail_dumps: false,
                fail_replays: false,
                initdb_code: 0,
                engine_script: READY_ENGINE.to_owned(),
            }),
            invocations: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().expect("cluster mutex poisoned")
    }

    /// Script run by `sh -c` whenever the engine is spawned.
    pub fn set_engine_script(&self, script: &str) {
        self.state().engine_script = script.to_owned();
    }

    /// Controls the outcome of the `SELECT 1` probe.
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Makes every `pg_dump` fail after writing partial output.
    pub fn fail_dumps(&self) {
        self.state().fail_dumps = true;
    }

    /// Makes every replay fail.
    pub fn fail_replays(&self) {
        self.state().fail_replays = true;
    }

    /// Exit code reported by `initdb`.
    pub fn set_initdb_code(&self, code: i32) {
        self.state().initdb_code = code;
    }

    /// Adds a role directly, bypassing the orchestrator.
    pub fn seed_user(&self, name: &str, password_hash: &str) {
        self.state()
            .users
            .insert(name.to_owned(), password_hash.to_owned());
    }

    /// Removes a role directly, bypassing the orchestrator.
    pub fn remove_user(&self, name: &str) {
        self.state().users.remove(name);
    }

    /// Adds a database with `contents`, bypassing the orchestrator.
    pub fn seed_database(&self, name: &str, owner: &str, contents: &str) {
        self.state().databases.insert(
            name.to_owned(),
            Database {
                owner: owner.to_owned(),
                contents: contents.to_owned(),
            },
        );
    }

    /// Replaces the contents of an existing database.
    pub fn write_contents(&self, name: &str, contents: &str) {
        if let Some(database) = self.state().databases.get_mut(name) {
            contents.clone_into(&mut database.contents);
        }
    }

    /// Stored password hash of `user`.
    pub fn password_of(&self, user: &str) -> Option<String> {
        self.state().users.get(user).cloned()
    }

    /// Owner of `database`.
    pub fn owner_of(&self, database: &str) -> Option<String> {
        self.state()
            .databases
            .get(database)
            .map(|database| database.owner.clone())
    }

    /// Contents of `database`.
    pub fn contents_of(&self, database: &str) -> Option<String> {
        self.state()
            .databases
            .get(database)
            .map(|database| database.contents.clone())
    }

    /// Whether `schema` exists in `database`.
    pub fn has_schema(&self, database: &str, schema: &str) -> bool {
        self.state()
            .schemas
            .contains(&(database.to_owned(), schema.to_owned()))
    }

    /// Every command run or spawned so far.
    pub fn invocations(&self) -> Vec<Recorded> {
        self.invocations
            .lock()
            .expect("invocation mutex poisoned")
            .clone()
    }

    /// SQL statements executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .filter_map(|recorded| recorded.sql().map(str::to_owned))
            .collect()
    }

    /// Number of invocations of `program`.
    pub fn count(&self, program: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|recorded| recorded.program() == program)
            .count()
    }

    /// Process ids of every engine spawned so far.
    pub fn spawned_pids(&self) -> Vec<u32> {
        self.spawned.lock().expect("spawned mutex poisoned").clone()
    }

    fn record(&self, invocation: &Invocation) {
        self.invocations
            .lock()
            .expect("invocation mutex poisoned")
            .push(Recorded {
                argv: invocation.argv().to_vec(),
                account: invocation.account().map(|account| account.user().to_owned()),
            });
    }

    fn initdb(&self, argv: &[String]) -> i32 {
        let code = self.state().initdb_code;
        if code != 0 {
            return code;
        }
        let data_dir = Path::new(flag(argv, "-D").expect("initdb needs -D"));
        fs::create_dir_all(data_dir).expect("create data directory");
        fs::write(data_dir.join("PG_VERSION"), "16\n").expect("write PG_VERSION");
        0
    }

    fn statement(&self, database: &str, sql: &str) -> i32 {
        let words: Vec<&str> = sql.split_whitespace().collect();
        let mut state = self.state();
        match words.as_slice() {
            ["SELECT", "1"] => {
                if state.reachable {
                    0
                } else {
                    2
                }
            }
            ["CREATE", "USER", name, "WITH", "PASSWORD", hash] => {
                if state.users.contains_key(*name) {
                    return 1;
                }
                state
                    .users
                    .insert((*name).to_owned(), hash.trim_matches('\'').to_owned());
                0
            }
            ["ALTER", "USER", name, "WITH", "PASSWORD", hash] => match state.users.get_mut(*name) {
                Some(slot) => {
                    *slot = hash.trim_matches('\'').to_owned();
                    0
                }
                None => 1,
            },
            ["CREATE", "DATABASE", name, "WITH", "ENCODING", "'UTF8'", "OWNER", owner] => {
                if state.databases.contains_key(*name) || !state.users.contains_key(*owner) {
                    return 1;
                }
                state.databases.insert(
                    (*name).to_owned(),
                    Database {
                        owner: (*owner).to_owned(),
                        contents: String::new(),
                    },
                );
                0
            }
            ["ALTER", "DATABASE", name, "OWNER", "TO", owner] => {
                if !state.users.contains_key(*owner) {
                    return 1;
                }
                match state.databases.get_mut(*name) {
                    Some(entry) => {
                        (*owner).clone_into(&mut entry.owner);
                        0
                    }
                    None => 1,
                }
            }
            ["DROP", "DATABASE", "IF", "EXISTS", name] => {
                state.databases.remove(*name);
                0
            }
            ["CREATE", "SCHEMA", schema, "AUTHORIZATION", _owner] => {
                if !state.databases.contains_key(database) {
                    return 2;
                }
                let key = (database.to_owned(), (*schema).to_owned());
                if state.schemas.insert(key) { 0 } else { 1 }
            }
            _ => 3,
        }
    }

    fn dump(&self, invocation: &mut Invocation) -> i32 {
        let database = flag(invocation.argv(), "-d")
            .expect("pg_dump needs -d")
            .to_owned();
        let mut out = invocation.take_stdout().expect("pg_dump needs stdout");
        let state = self.state();
        match state.databases.get(&database) {
            Some(entry) if !state.fail_dumps => {
                out.write_all(entry.contents.as_bytes()).expect("write dump");
                0
            }
            _ => {
                out.write_all(b"-- partial dump\n").expect("write partial dump");
                1
            }
        }
    }

    fn replay(&self, invocation: &mut Invocation) -> i32 {
        let database = flag(invocation.argv(), "-d")
            .expect("replay needs -d")
            .to_owned();
        let mut script = String::new();
        invocation
            .take_stdin()
            .expect("replay needs stdin")
            .read_to_string(&mut script)
            .expect("read replay script");
        let mut state = self.state();
        if state.fail_replays {
            return 3;
        }
        match state.databases.get_mut(&database) {
            Some(entry) => {
                entry.contents = script;
                0
            }
            None => 2,
        }
    }
}

impl CommandRunner for FakeCluster {
    fn status(&self, mut invocation: Invocation) -> Result<ExitStatus, ProcessError> {
        self.record(&invocation);
        let argv = invocation.argv().to_vec();
        let code = match argv.first().map(String::as_str) {
            Some("initdb") => self.initdb(&argv),
            Some("pg_dump") => self.dump(&mut invocation),
            Some("psql") => match flag(&argv, "-c") {
                Some(sql) => {
                    let database = flag(&argv, "-d").unwrap_or("postgres");
                    self.statement(database, sql)
                }
                None => self.replay(&mut invocation),
            },
            _ => 127,
        };
        Ok(ExitStatus::from_raw(code << 8))
    }

    fn spawn(&self, invocation: Invocation) -> Result<ProcessHandle, ProcessError> {
        self.record(&invocation);
        let script = self.state().engine_script.clone();
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        let handle = ProcessHandle::spawn(command, "postgres")?;
        self.spawned
            .lock()
            .expect("spawned mutex poisoned")
            .push(handle.pid());
        Ok(handle)
    }
}

fn flag<'a>(argv: &'a [String], name: &str) -> Option<&'a str> {
    argv.windows(2)
        .find(|pair| pair[0] == name)
        .map(|pair| pair[1].as_str())
}
