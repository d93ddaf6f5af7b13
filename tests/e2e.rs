use std::path::Path;
use std::process::Command;

fn run(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_ledger-eng"))
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("LEDGER_ACCOUNTS")
        .env_remove("LEDGER_DATABASE")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn fixture(name: &str) -> String {
    format!("tests/fixtures/{name}")
}

#[test]
fn valid_transfers() {
    let (stdout, stderr, success) = run(&[
        &fixture("valid.csv"),
        "--accounts",
        &fixture("accounts.csv"),
    ]);

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "id,number,kind,balance,credit_limit",
            "1,1000-A,checking,2650.00,",
            "2,2000-B,savings,5100.00,",
            "3,3000-C,credit,250.00,1000.00",
        ]
    );
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run(&[
        &fixture("with_errors.csv"),
        "--accounts",
        &fixture("accounts.csv"),
    ]);

    assert!(success);
    assert!(stderr.contains("line 3: invalid amount"));
    assert!(stderr.contains("more than 2 decimal places"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "id,number,kind,balance,credit_limit");
    assert_eq!(lines[1], "1,1000-A,checking,2410.00,");
    assert_eq!(lines[2], "2,2000-B,savings,5090.00,");
    assert_eq!(lines[3], "3,3000-C,credit,0.00,1000.00");
}

#[test]
fn history_of_a_user() {
    let (stdout, _, success) = run(&[
        &fixture("valid.csv"),
        "--accounts",
        &fixture("accounts.csv"),
        "--history",
        "2",
    ]);

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines[0],
        "id,account,amount,type,description,counterparty,transfer,date"
    );
    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains(",2,100.00,transfer,Transfer from account 1000-A,,"));
    assert!(lines[2].contains(",1,-100.00,transfer,Transfer to account 2000-B,2,"));
}

#[test]
fn sqlite_ledger_persists_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let database = dir.path().join("ledger.db");
    let database = database.to_str().unwrap();

    let (_, _, success) = run(&[
        &fixture("valid.csv"),
        "--accounts",
        &fixture("accounts.csv"),
        "--database",
        database,
    ]);
    assert!(success);
    assert!(Path::new(database).exists());

    // second run reuses the accounts already in the database
    let (stdout, stderr, success) = run(&[&fixture("valid.csv"), "--database", database]);
    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[1], "1,1000-A,checking,2800.00,");
    assert_eq!(lines[2], "2,2000-B,savings,5200.00,");
    assert_eq!(lines[3], "3,3000-C,credit,500.00,1000.00");
}

#[test]
fn missing_transfers_file_fails() {
    let (_, stderr, success) = run(&["tests/fixtures/nope.csv"]);
    assert!(!success);
    assert!(stderr.contains("cannot open"));
}
