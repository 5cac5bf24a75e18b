use assert_cmd::Command;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::str;

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

fn geoipfilter() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("geoipfilter").unwrap();
    cmd.env_remove("GEOIP_MMDB_PATH").env_remove("GEOIPFILTER_LOG");
    cmd
}

/// Run against the City fixture and parse every output line as JSON.
fn run_geoipfilter(input: &str, args: &[&str]) -> Vec<Value> {
    let output = geoipfilter()
        .env("GEOIP_MMDB_PATH", fixture("GeoLite2-City-Test.mmdb"))
        .args(args)
        .write_stdin(input)
        .output()
        .expect("failed to execute");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    str::from_utf8(&output.stdout)
        .expect("Failed to read stdout as UTF-8")
        .lines()
        .map(|line| serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string())))
        .collect()
}

#[test]
fn enrich_events() {
    let input = "{\"client\":{\"ip\":\"8.8.8.8\"}}\n{\"client\":{\"ip\":\"not-an-ip\"}}\n";
    let output = run_geoipfilter(input, &["--src", "client.ip", "--target", "geo"]);

    assert_eq!(output.len(), 2);
    assert_eq!(output[0]["geo"]["country_name"], "United States");
    assert_eq!(output[0]["geo"]["region_name"], "California");
    assert_eq!(output[1], json!({"client": {"ip": "not-an-ip"}}));
}

#[test]
fn language_and_default_target() {
    let output = run_geoipfilter("{\"ip\":\"8.8.8.8\"}\n", &["-s", "ip", "-l", "de"]);
    assert_eq!(output[0]["geoip"]["country_name"], "USA");
}

#[test]
fn output_order_preserved() {
    let ips = ["8.8.8.8", "1.1.1.1", "10.0.0.1", "81.2.69.142"];
    let input: String = (0..1000)
        .map(|i| format!("{{\"n\":{i},\"ip\":\"{}\"}}\n", ips[i % ips.len()]))
        .collect();
    let output = run_geoipfilter(&input, &["-s", "ip", "-j", "4"]);

    assert_eq!(output.len(), 1000);
    for (i, event) in output.iter().enumerate() {
        assert_eq!(event["n"], i);
        assert_eq!(event["geoip"].is_object(), ips[i % ips.len()] != "10.0.0.1");
    }
}

#[test]
fn fail_tag() {
    let input = "{\"ip\":\"10.0.0.1\",\"tags\":[\"web\"]}\n{\"ip\":\"8.8.8.8\"}\n";
    let output = run_geoipfilter(input, &["-s", "ip", "--fail-tag", "_geoip_lookup_failure"]);

    assert_eq!(
        output[0],
        json!({"ip": "10.0.0.1", "tags": ["web", "_geoip_lookup_failure"]})
    );
    assert!(output[1].get("tags").is_none());
}

#[test]
fn drop_failed() {
    let input = "{\"ip\":\"10.0.0.1\"}\n{\"ip\":\"1.1.1.1\"}\n{\"ip\":\"bogus\"}\n";
    let output = run_geoipfilter(input, &["-s", "ip", "--drop-failed"]);

    assert_eq!(output.len(), 1);
    assert_eq!(output[0]["geoip"]["country_name"], "Australia");
}

#[test]
fn non_json_lines_pass_through() {
    let input = "just a log line\n\n{\"ip\":\"8.8.8.8\"}\n";
    let output = run_geoipfilter(input, &["-s", "ip"]);

    assert_eq!(output.len(), 2);
    assert_eq!(output[0], "just a log line");
    assert!(output[1]["geoip"].is_object());
}

#[test]
fn input_files() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{{\"ip\":\"81.2.69.142\"}}").unwrap();
    let path = file.path().to_str().unwrap();

    let output = run_geoipfilter("{\"ip\":\"8.8.8.8\"}\n", &["-s", "ip", path, "-"]);
    assert_eq!(output.len(), 2);
    assert_eq!(output[0]["geoip"]["city_name"], "London");
    assert_eq!(output[1]["geoip"]["city_name"], "Mountain View");
}

#[test]
fn config_file_with_override() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    serde_json::to_writer(
        &mut file,
        &json!({
            "src": "[client][ip]",
            "dbPath": fixture("GeoLite2-City-Test.mmdb"),
            "target": "geo",
            "language": "de"
        }),
    )
    .unwrap();

    let output = geoipfilter()
        .args(["--config", file.path().to_str().unwrap(), "--language", "en"])
        .write_stdin("{\"client\":{\"ip\":\"8.8.8.8\"}}\n")
        .output()
        .expect("failed to execute");
    assert!(output.status.success());

    let event: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(event["geo"]["country_name"], "United States");
}

#[test]
fn isp_database() {
    let output = geoipfilter()
        .args(["-s", "ip", "-d"])
        .arg(fixture("GeoIP2-ISP-Test.mmdb"))
        .write_stdin("{\"ip\":\"1.128.0.1\"}\n")
        .output()
        .expect("failed to execute");
    assert!(output.status.success());

    let event: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(event["geoip"], json!({"isp": "Telstra Internet"}));
}

#[test]
fn country_database_enriches_nothing() {
    let output = geoipfilter()
        .args(["-s", "ip", "--fail-tag", "_geoip_lookup_failure", "-d"])
        .arg(fixture("GeoLite2-Country-Test.mmdb"))
        .write_stdin("{\"ip\":\"8.8.8.8\"}\n")
        .output()
        .expect("failed to execute");
    assert!(output.status.success());

    let event: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        event,
        json!({"ip": "8.8.8.8", "tags": ["_geoip_lookup_failure"]})
    );
}

#[test]
fn missing_src() {
    let output = geoipfilter()
        .env("GEOIP_MMDB_PATH", fixture("GeoLite2-City-Test.mmdb"))
        .write_stdin("{}\n")
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("src must be set"), "stderr: {stderr}");
}

#[test]
fn missing_database() {
    let output = geoipfilter()
        .args(["-s", "ip", "-d", "/nonexistent/GeoLite2-City.mmdb"])
        .write_stdin("{}\n")
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/nonexistent/GeoLite2-City.mmdb"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn invalid_src_path() {
    let output = geoipfilter()
        .env("GEOIP_MMDB_PATH", fixture("GeoLite2-City-Test.mmdb"))
        .args(["-s", "[client"])
        .write_stdin("{}\n")
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid field path"), "stderr: {stderr}");
}
