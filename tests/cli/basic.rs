use crate::cli::*;

#[test]
fn test_help_lists_commands() -> Result<(), Box<dyn std::error::Error>> {
    let output = Command::cargo_bin("schemaseed")?.arg("--help").output()?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["databases", "tables", "all", "check"] {
        assert!(stdout.contains(command), "{command} missing from {stdout}");
    }

    Ok(())
}

#[test]
fn test_unreachable_server_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = setup_temp_config("")?;

    // Nothing listens on port 1
    let output = schemaseed(&temp_dir)
        .arg("databases")
        .env("SCHEMASEED__SERVER__HOST", "127.0.0.1")
        .env("SCHEMASEED__SERVER__PORT", "1")
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Failed connecting to database \"postgres\""),
        "{stderr}"
    );
    assert!(output.stdout.is_empty());

    Ok(())
}

#[test]
fn test_invalid_config_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = setup_temp_config(
        r#"
databases = ["demo"]

[server]
dbname = "demo"
"#,
    )?;

    let output = schemaseed(&temp_dir).arg("--dry-run").arg("all").output()?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid configuration"), "{stderr}");
    assert!(output.stdout.is_empty());

    Ok(())
}

#[test]
fn test_unknown_table_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = setup_temp_config("")?;

    let output = schemaseed(&temp_dir)
        .args(["--dry-run", "tables", "-t", "patients"])
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown table \"patients\""), "{stderr}");

    Ok(())
}
