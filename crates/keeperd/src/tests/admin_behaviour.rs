//! Behavioural tests for role, database and schema management.

use std::sync::Arc;

use rstest::rstest;

use crate::admin::{AdminError, AdminOperations, ObjectKind, password_hash};
use crate::process::CommandRunner;

use super::support::{TestEnvironment, assert_reaped, environment, runner_unused};

#[rstest]
fn create_user_stores_md5_hash(environment: TestEnvironment) {
    let supervisor = environment.supervisor();
    let admin = AdminOperations::new(&supervisor);

    admin.create_user("alice", "s3cret").expect("create user");

    assert_eq!(
        environment.cluster.password_of("alice"),
        Some(password_hash("alice", "s3cret"))
    );
    let statement = environment
        .cluster
        .invocations()
        .into_iter()
        .find(|recorded| recorded.program() == "psql")
        .expect("psql invoked");
    assert_eq!(statement.account.as_deref(), Some("postgres"));
    assert!(!statement.sql().unwrap_or_default().contains("s3cret"));
    assert_reaped(environment.cluster.spawned_pids()[0]);
}

#[rstest]
fn duplicate_user_is_reported_as_already_exists(environment: TestEnvironment) {
    environment.cluster.seed_user("alice", "md5old");
    let supervisor = environment.supervisor();

    let error = AdminOperations::new(&supervisor)
        .create_user("alice", "other")
        .expect_err("duplicate should fail");

    assert!(matches!(
        error,
        AdminError::AlreadyExists { kind: ObjectKind::User, ref name } if name == "alice"
    ));
    assert_eq!(environment.cluster.password_of("alice").as_deref(), Some("md5old"));
}

#[rstest]
fn rotating_a_password_replaces_the_hash(environment: TestEnvironment) {
    let supervisor = environment.supervisor();
    let admin = AdminOperations::new(&supervisor);
    admin.create_user("alice", "secret1").expect("create user");

    admin.set_password("alice", "secret2").expect("rotate");

    let stored = environment.cluster.password_of("alice");
    assert_eq!(stored, Some(password_hash("alice", "secret2")));
    assert_ne!(stored, Some(password_hash("alice", "secret1")));
}

#[rstest]
fn set_password_for_unknown_user_fails(environment: TestEnvironment) {
    let supervisor = environment.supervisor();

    let error = AdminOperations::new(&supervisor)
        .set_password("ghost", "secret")
        .expect_err("unknown user should fail");

    assert!(matches!(error, AdminError::ClientFailed { code: Some(1), .. }));
}

#[rstest]
fn creates_database_and_schema(environment: TestEnvironment) {
    let supervisor = environment.supervisor();
    let admin = AdminOperations::new(&supervisor);

    supervisor
        .with_service(|| {
            admin.create_user("alice", "secret")?;
            admin.create_database("shop", "alice")?;
            admin.create_schema("shop", "sales", "alice")
        })
        .expect("provision");

    assert_eq!(environment.cluster.owner_of("shop").as_deref(), Some("alice"));
    assert!(environment.cluster.has_schema("shop", "sales"));
    assert_eq!(environment.cluster.spawned_pids().len(), 1);
    assert!(environment.cluster.statements().contains(
        &"CREATE DATABASE shop WITH ENCODING 'UTF8' OWNER alice".to_owned()
    ));
}

#[rstest]
fn duplicate_schema_is_reported_as_already_exists(environment: TestEnvironment) {
    environment.cluster.seed_database("shop", "postgres", "");
    let supervisor = environment.supervisor();
    let admin = AdminOperations::new(&supervisor);
    admin.create_schema("shop", "sales", "postgres").expect("first");

    let error = admin
        .create_schema("shop", "sales", "postgres")
        .expect_err("second should fail");

    assert!(matches!(
        error,
        AdminError::AlreadyExists { kind: ObjectKind::Schema, .. }
    ));
}

#[rstest]
fn schema_in_missing_database_fails_with_client_code(environment: TestEnvironment) {
    let supervisor = environment.supervisor();

    let error = AdminOperations::new(&supervisor)
        .create_schema("nowhere", "sales", "postgres")
        .expect_err("missing database should fail");

    assert!(matches!(error, AdminError::ClientFailed { code: Some(2), .. }));
}

#[rstest]
fn drop_and_reassign_database(environment: TestEnvironment) {
    environment.cluster.seed_user("bob", "md5bob");
    environment.cluster.seed_database("shop", "postgres", "rows");
    environment.cluster.seed_database("old", "postgres", "");
    let supervisor = environment.supervisor();
    let admin = AdminOperations::new(&supervisor);

    admin.alter_database_owner("shop", "bob").expect("reassign");
    admin.drop_database("old").expect("drop");
    admin.drop_database("old").expect("dropping twice is harmless");

    assert_eq!(environment.cluster.owner_of("shop").as_deref(), Some("bob"));
    assert_eq!(environment.cluster.contents_of("old"), None);
}

#[rstest]
#[case::user_with_space(|admin: AdminOperations<'_>| admin.create_user("bad name", "pw"))]
#[case::quoted_database(|admin: AdminOperations<'_>| admin.create_database("shop'; --", "bob"))]
#[case::leading_digit_schema(|admin: AdminOperations<'_>| admin.create_schema("shop", "1sales", "bob"))]
#[case::invalid_owner(|admin: AdminOperations<'_>| admin.alter_database_owner("shop", "bo-b"))]
fn invalid_identifiers_never_reach_the_engine(
    environment: TestEnvironment,
    #[case] operation: fn(AdminOperations<'_>) -> Result<(), AdminError>,
) {
    let runner: Arc<dyn CommandRunner> = Arc::new(runner_unused());
    let supervisor = environment.supervisor_with(runner);

    let error = operation(AdminOperations::new(&supervisor)).expect_err("should be rejected");

    assert!(matches!(error, AdminError::InvalidIdentifier { .. }));
}
