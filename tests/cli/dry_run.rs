use crate::cli::*;

const TEST_CONFIG: &str = r#"
[server]
host = "postgres"
dbname = "demo"
user = "postgres"
password = "postgres1234"
"#;

fn stdout_lines(output: &std::process::Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(String::from)
        .collect()
}

#[test]
fn test_dry_run_all() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = setup_temp_config(TEST_CONFIG)?;

    let output = schemaseed(&temp_dir).args(["--dry-run", "all"]).output()?;
    assert!(output.status.success());

    let notifications = "CREATE TABLE IF NOT EXISTS notifications (study_uid varchar(100), \
        notification_time varchar(100), patient varchar(100), users varchar(1000), \
        cre_datetime timestamp)";
    let scans = "CREATE TABLE IF NOT EXISTS scans (study_uid varchar(100), \
        viz_lvo varchar(100), first_acquired varchar(100), patient_first_acquired varchar(100), \
        patient_institution varchar(100), patient varchar(100), cre_datetime timestamp)";
    let users = "CREATE TABLE IF NOT EXISTS users (name varchar(100), address varchar(100), \
        user_uid varchar(100), cre_datetime timestamp)";

    let mut expected = vec![
        "demo: DROP DATABASE IF EXISTS source;".to_string(),
        "demo: CREATE DATABASE source;".to_string(),
        "demo: DROP DATABASE IF EXISTS target;".to_string(),
        "demo: CREATE DATABASE target;".to_string(),
    ];
    for database in ["source", "target"] {
        for table in [notifications, scans, users] {
            expected.push(format!("{database}: {table};"));
        }
    }

    assert_eq!(stdout_lines(&output), expected);

    Ok(())
}

#[test]
fn test_dry_run_single_table() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = setup_temp_config(TEST_CONFIG)?;

    let output = schemaseed(&temp_dir)
        .args(["--dry-run", "tables", "--table", "users"])
        .output()?;
    assert!(output.status.success());

    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("source: CREATE TABLE IF NOT EXISTS users ("));
    assert!(lines[1].starts_with("target: CREATE TABLE IF NOT EXISTS users ("));

    Ok(())
}

#[test]
fn test_dry_run_check() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = setup_temp_config(TEST_CONFIG)?;

    let output = schemaseed(&temp_dir).args(["--dry-run", "check"]).output()?;
    assert!(output.status.success());

    let lines = stdout_lines(&output);
    assert_eq!(lines[0], "source: present");
    assert!(lines.contains(&"  target.scans: missing".to_string()));
    assert_eq!(lines.len(), 8);

    Ok(())
}

#[test]
fn test_json_logs_go_to_stderr() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = setup_temp_config(TEST_CONFIG)?;

    let output = schemaseed(&temp_dir)
        .args(["--json-logs", "--dry-run", "databases"])
        .output()?;
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr
        .lines()
        .any(|line| line.starts_with('{') && line.contains("Recreated database source")));
    assert_eq!(stdout_lines(&output).len(), 4);

    Ok(())
}
