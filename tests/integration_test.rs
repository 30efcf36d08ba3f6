use pcm60x_logger::balance;
use pcm60x_logger::config::Config;
use serial_test::serial;
use std::time::Duration;

const CONFIG: &str = r#"
serial:
  port: "/dev/ttyUSB3"
  baud_rate: 2400

session:
  duration_secs: 3600
  poll_interval_secs: 30

sheets:
  credentials_file: "/etc/pcm60x/key.json"
  spreadsheet: "pcm60x_charging_log"
  summary_worksheet: 3
  energy_cell: "M2"

output:
  directory: "/var/lib/pcm60x"
"#;

fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("{}-{}.yaml", name, std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

/// Test configuration loading
#[test]
#[serial]
fn test_config_loading() {
    let path = write_config("pcm60x-config", CONFIG);

    let port = std::env::var("PCM60X_SERIAL_PORT").ok();
    let creds = std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok();
    std::env::remove_var("PCM60X_SERIAL_PORT");
    std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");

    let config = Config::load(&path).unwrap();

    if let Some(val) = port {
        std::env::set_var("PCM60X_SERIAL_PORT", val);
    }
    if let Some(val) = creds {
        std::env::set_var("GOOGLE_APPLICATION_CREDENTIALS", val);
    }

    assert_eq!(config.serial.port, "/dev/ttyUSB3");
    assert_eq!(config.serial.timeout(), Duration::from_secs(2));
    assert_eq!(config.session.duration(), Duration::from_secs(3600));
    assert_eq!(config.session.poll_interval(), Duration::from_secs(30));
    assert_eq!(config.sheets.credentials_file, "/etc/pcm60x/key.json");
    assert_eq!(config.sheets.summary_target().worksheet, 3);
    assert_eq!(config.sheets.log_target().spreadsheet, "pcm60x_charging_log");
    assert_eq!(config.sheets.energy_cell, "M2");
    assert_eq!(config.sheets.reset_delay(), Duration::from_millis(1100));
    assert_eq!(config.output.directory, "/var/lib/pcm60x");

    std::fs::remove_file(&path).ok();
}

/// Test environment variable overrides for the port and credentials
#[test]
#[serial]
fn test_config_env_override() {
    let path = write_config("pcm60x-config-env", CONFIG);

    let port = std::env::var("PCM60X_SERIAL_PORT").ok();
    let creds = std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok();
    std::env::set_var("PCM60X_SERIAL_PORT", "/dev/ttyACM1");
    std::env::set_var("GOOGLE_APPLICATION_CREDENTIALS", "/run/secrets/sa.json");

    let config = Config::load(&path).unwrap();

    match port {
        Some(val) => std::env::set_var("PCM60X_SERIAL_PORT", val),
        None => std::env::remove_var("PCM60X_SERIAL_PORT"),
    }
    match creds {
        Some(val) => std::env::set_var("GOOGLE_APPLICATION_CREDENTIALS", val),
        None => std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS"),
    }

    assert_eq!(config.serial.port, "/dev/ttyACM1");
    assert_eq!(config.sheets.credentials_file, "/run/secrets/sa.json");

    std::fs::remove_file(&path).ok();
}

/// The shipped example config parses once its placeholders resolve
#[test]
#[serial]
fn test_example_config_loads() {
    let home = std::env::var("HOME").ok();
    std::env::set_var("HOME", "/home/solar");
    std::env::remove_var("PCM60X_PORT");
    std::env::remove_var("PCM60X_SERIAL_PORT");
    std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/config.example.yaml");
    let config = Config::load(path).unwrap();

    match home {
        Some(val) => std::env::set_var("HOME", val),
        None => std::env::remove_var("HOME"),
    }

    assert_eq!(config.serial.port, "/dev/ttyACM0");
    assert_eq!(
        config.sheets.credentials_file,
        "/home/solar/.config/pcm60x/service_account.json"
    );
    assert_eq!(config.balance.log_file, "string1_pack_v_log.dat");
}

#[test]
#[serial]
fn test_config_missing_file() {
    assert!(Config::load("/nonexistent/pcm60x.yaml").is_err());
}

#[test]
fn test_pack_balance_report() {
    let voltages = [13.1, 13.0, 12.9, 13.0, 13.2, 12.8, 13.0];
    let report = balance::analyse(&voltages, chrono::Local::now()).unwrap();

    assert!((report.mean - 13.0).abs() < 1e-9);
    let (low, high) = report.out_of_balance;
    assert!(low < 0.0 && high > 0.0);
    assert!((high - (100.0 * 13.2 / 13.0 - 100.0)).abs() < 1e-9);
    assert_eq!(report.sheet_row().len(), 9);
    assert_eq!(report.log_line().matches(',').count(), 7);
}
