//! CLI integration tests for elroi admin commands.
//!
//! Each test uses an isolated temp directory for the database, ensuring tests
//! can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use std::path::Path;

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use elroi::rbac::catalog;
use elroi::store::{SqliteStore, Store};
use predicates::prelude::*;

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    fn data_dir_str(&self) -> String {
        self.data_dir().to_string_lossy().to_string()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("elroi").expect("failed to find binary");
        cmd.env("NO_COLOR", "1").env_remove("ELROI_ROOT_PASSWORD");
        cmd
    }

    fn init(&self) -> assert_cmd::assert::Assert {
        self.cmd()
            .args([
                "admin",
                "init",
                "--data-dir",
                &self.data_dir_str(),
                "--non-interactive",
                "--name",
                "Root",
                "--username",
                "root",
                "--email",
                "root@test.dev",
                "--password",
                "correct-horse",
            ])
            .assert()
    }

    fn open_store(&self) -> SqliteStore {
        SqliteStore::new(self.data_dir().join("elroi.db")).expect("failed to open store")
    }
}

// ============================================================================
// Init Command Tests
// ============================================================================

#[test]
fn init_creates_database_with_seeded_catalog_and_root_user() {
    let ctx = TestContext::new();

    ctx.init()
        .success()
        .stdout(predicate::str::contains("Created root user 'root' (id 1)"));

    ctx.temp_dir.child("elroi.db").assert(predicate::path::exists());

    let store = ctx.open_store();
    assert_eq!(
        store.count_permissions(Some("web")).unwrap(),
        catalog::SEED_PERMISSIONS.len() as i64
    );
    assert_eq!(store.count_roles(Some("web")).unwrap(), 3);

    let root = store.get_user(1).unwrap().expect("root user");
    assert_eq!(root.username, "root");
    assert!(root.is_verified());

    let roles = store.user_roles(1).unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].name, catalog::MASTER);
}

#[test]
fn init_rejects_second_initialization_with_existing_database() {
    let ctx = TestContext::new();

    ctx.init().success();
    ctx.init()
        .failure()
        .stderr(predicate::str::contains("already initialized"));

    assert_eq!(ctx.open_store().count_users().unwrap(), 1);
}

#[test]
fn init_non_interactive_requires_root_user_flags() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args([
            "admin",
            "init",
            "--data-dir",
            &ctx.data_dir_str(),
            "--non-interactive",
            "--name",
            "Root",
            "--username",
            "root",
            "--email",
            "root@test.dev",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--password is required"));

    assert_eq!(ctx.open_store().count_users().unwrap(), 0);
}

#[test]
fn init_rejects_short_password() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args([
            "admin",
            "init",
            "--data-dir",
            &ctx.data_dir_str(),
            "--non-interactive",
            "--name",
            "Root",
            "--username",
            "root",
            "--email",
            "root@test.dev",
            "--password",
            "short",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 8 characters"));
}

#[test]
fn init_reads_guard_from_config_file() {
    let ctx = TestContext::new();
    let config = ctx.temp_dir.child("elroi.toml");
    config
        .write_str(&format!(
            "data_dir = \"{}\"\ndefault_guard = \"api\"\n",
            ctx.data_dir_str().replace('\\', "\\\\")
        ))
        .unwrap();

    ctx.cmd()
        .args(["admin", "init", "--config"])
        .arg(config.path())
        .args([
            "--non-interactive",
            "--name",
            "Root",
            "--username",
            "root",
            "--email",
            "root@test.dev",
            "--password",
            "correct-horse",
        ])
        .assert()
        .success();

    let store = ctx.open_store();
    assert_eq!(store.count_roles(Some("api")).unwrap(), 3);
    assert_eq!(store.count_roles(Some("web")).unwrap(), 0);
}

// ============================================================================
// Seed Command Tests
// ============================================================================

#[test]
fn seed_is_idempotent_and_restores_seeded_grants() {
    let ctx = TestContext::new();
    ctx.init().success();

    let store = ctx.open_store();
    store.replace_role_permissions(3, &[]).unwrap();
    drop(store);

    ctx.cmd()
        .args(["admin", "seed", "--data-dir", &ctx.data_dir_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Seeded 0 new permissions and 0 new roles",
        ));

    let store = ctx.open_store();
    assert_eq!(
        store.role_permissions(3).unwrap().len(),
        catalog::seed_grants(catalog::MEMBER).len()
    );
}

// ============================================================================
// Serve Command Tests
// ============================================================================

#[test]
fn serve_requires_initialization() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args(["serve", "--data-dir", &ctx.data_dir_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Server not initialized"));
}

#[test]
fn serve_rejects_invalid_config_file() {
    let ctx = TestContext::new();
    let config = ctx.temp_dir.child("elroi.toml");
    config.write_str("session_ttl_hours = 0\n").unwrap();

    ctx.cmd()
        .args(["serve", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("session_ttl_hours must be positive"));
}
