//! End-to-end agent scenarios against a mock platform.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local};

use vigil_agent::config::AgentConfig;
use vigil_agent::lifecycle;

/// Config pointed at the mock server, with tight intervals and the CPU probe
/// disabled so dispatches do not pay the utilization sampling window.
fn test_config(base_url: &str) -> AgentConfig {
    let mut config: AgentConfig = toml::from_str(&format!(
        r#"
[collect.system]
cpu = false

[device_monitor]
enabled = true
base_url = "{base_url}"
timeout_secs = 5
heartbeat_interval_secs = 60
config_refresh_interval_secs = 300
metrics_buffer_size = 100
metrics_flush_interval_secs = 60
command_map_path = "does-not-exist.yaml"
"#
    ))
    .unwrap();
    config.validate().unwrap();
    config
}

fn register_body(token: &str) -> String {
    format!(r#"{{"code":200,"msg":"ok","data":{{"agentId":"a1","token":"{token}"}}}}"#)
}

fn config_body(items: &str) -> String {
    format!(r#"{{"code":200,"msg":"ok","data":{items}}}"#)
}

const OK_BODY: &str = r#"{"code":200,"msg":"ok"}"#;

async fn run_for(config: AgentConfig, duration: Duration) {
    lifecycle::run(config, async move {
        tokio::time::sleep(duration).await;
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn cold_start_samples_and_ships_metrics() {
    let mut server = mockito::Server::new_async().await;

    let register = server
        .mock("POST", "/deviceMonitor/agent/register")
        .with_status(200)
        .with_body(register_body("t1"))
        .expect(1)
        .create_async()
        .await;
    server
        .mock("POST", "/deviceMonitor/agent/heartbeat")
        .match_header("authorization", "Bearer t1")
        .with_status(200)
        .with_body(OK_BODY)
        .expect_at_least(1)
        .create_async()
        .await;
    server
        .mock("GET", "/deviceMonitor/agent/config/a1")
        .match_header("authorization", "Bearer t1")
        .with_status(200)
        .with_body(config_body(
            r#"[{"itemId":1,"itemName":"OS","itemkey":"system.uname","infoType":0,"updateIntervalseconds":1,"timeout":5,"intervals":null}]"#,
        ))
        .create_async()
        .await;
    let metrics = server
        .mock("POST", "/deviceMonitor/agent/metrics")
        .match_header("authorization", "Bearer t1")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "itemId": 1,
        })))
        .with_status(200)
        .with_body(OK_BODY)
        .expect_at_least(2)
        .create_async()
        .await;

    run_for(test_config(&server.url()), Duration::from_millis(3500)).await;

    register.assert_async().await;
    metrics.assert_async().await;
}

#[tokio::test]
async fn calendar_window_overrides_default_cadence() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("POST", "/deviceMonitor/agent/register")
        .with_status(200)
        .with_body(register_body("t1"))
        .create_async()
        .await;
    server
        .mock("POST", "/deviceMonitor/agent/heartbeat")
        .with_status(200)
        .with_body(OK_BODY)
        .expect_at_least(1)
        .create_async()
        .await;

    // A window covering the whole current day with a 1 s interval; the 60 s
    // default must not apply while inside it.
    let today = Local::now().weekday().number_from_monday();
    let intervals = format!(
        r#"[{{\"week\":{today},\"startTime\":\"00:00:00\",\"endTime\":\"23:59:59\",\"intervalSeconds\":1}}]"#
    );
    server
        .mock("GET", "/deviceMonitor/agent/config/a1")
        .with_status(200)
        .with_body(config_body(&format!(
            r#"[{{"itemId":2,"itemName":"OS","itemkey":"system.uname","infoType":0,"updateIntervalseconds":60,"timeout":5,"intervals":"{intervals}"}}]"#
        )))
        .create_async()
        .await;
    let metrics = server
        .mock("POST", "/deviceMonitor/agent/metrics")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "itemId": 2,
        })))
        .with_status(200)
        .with_body(OK_BODY)
        .expect_at_least(3)
        .create_async()
        .await;

    run_for(test_config(&server.url()), Duration::from_millis(4500)).await;

    metrics.assert_async().await;
}

#[tokio::test]
async fn auth_failure_drives_reregistration() {
    let mut server = mockito::Server::new_async().await;

    // First registration issues t1, every later one issues t2.
    let register_calls = Arc::new(AtomicUsize::new(0));
    let counter = register_calls.clone();
    let register = server
        .mock("POST", "/deviceMonitor/agent/register")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_req| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            let token = if call == 0 { "t1" } else { "t2" };
            register_body(token).into_bytes()
        })
        .expect_at_least(2)
        .create_async()
        .await;

    // Heartbeats are always rejected as unauthenticated.
    server
        .mock("POST", "/deviceMonitor/agent/heartbeat")
        .with_status(401)
        .with_body("Unauthorized")
        .expect_at_least(1)
        .create_async()
        .await;

    server
        .mock("GET", "/deviceMonitor/agent/config/a1")
        .match_header("authorization", "Bearer t1")
        .with_status(200)
        .with_body(config_body("[]"))
        .create_async()
        .await;
    // After re-registration, the refreshed fetch must carry the new token.
    let config_t2 = server
        .mock("GET", "/deviceMonitor/agent/config/a1")
        .match_header("authorization", "Bearer t2")
        .with_status(200)
        .with_body(config_body("[]"))
        .expect_at_least(1)
        .create_async()
        .await;

    let mut config = test_config(&server.url());
    config.device_monitor.heartbeat_interval_secs = 1;
    run_for(config, Duration::from_millis(4000)).await;

    register.assert_async().await;
    config_t2.assert_async().await;
    assert!(register_calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn mapped_command_wins_over_builtin_key() {
    use std::io::Write;

    let mut map_file = tempfile::NamedTempFile::new().unwrap();
    write!(
        map_file,
        r#"
commands:
  system.cpu.util:
    type: shell
    command: "echo 42"
settings:
  retry_count: 0
"#
    )
    .unwrap();

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/deviceMonitor/agent/register")
        .with_status(200)
        .with_body(register_body("t1"))
        .create_async()
        .await;
    server
        .mock("POST", "/deviceMonitor/agent/heartbeat")
        .with_status(200)
        .with_body(OK_BODY)
        .expect_at_least(1)
        .create_async()
        .await;
    server
        .mock("GET", "/deviceMonitor/agent/config/a1")
        .with_status(200)
        .with_body(config_body(
            r#"[{"itemId":3,"itemName":"CPU","itemkey":"system.cpu.util","infoType":0,"updateIntervalseconds":1,"timeout":5,"intervals":null}]"#,
        ))
        .create_async()
        .await;
    // The builtin registry also knows system.cpu.util; the mapped command's
    // output must be what reaches the wire.
    let metrics = server
        .mock("POST", "/deviceMonitor/agent/metrics")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "itemId": 3,
            "value": 42,
        })))
        .with_status(200)
        .with_body(OK_BODY)
        .expect_at_least(1)
        .create_async()
        .await;

    let mut config = test_config(&server.url());
    config.device_monitor.command_map_path = map_file.path().to_string_lossy().into_owned();
    run_for(config, Duration::from_millis(3000)).await;

    metrics.assert_async().await;
}

#[tokio::test]
async fn disabled_platform_runs_locally_and_stops_cleanly() {
    // No platform section: the agent must stay alive on local health logging
    // and exit zero on shutdown without ever touching the network.
    let mut config: AgentConfig = toml::from_str(
        r#"
[agent]
interval_secs = 1

[collect.system]
cpu = false
"#,
    )
    .unwrap();
    config.validate().unwrap();
    assert!(!config.device_monitor.enabled);

    run_for(config, Duration::from_millis(1200)).await;
}

#[tokio::test]
async fn plan_change_reshapes_the_running_items() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("POST", "/deviceMonitor/agent/register")
        .with_status(200)
        .with_body(register_body("t1"))
        .create_async()
        .await;
    server
        .mock("POST", "/deviceMonitor/agent/heartbeat")
        .with_status(200)
        .with_body(OK_BODY)
        .expect_at_least(1)
        .create_async()
        .await;

    // First fetch: items {1, 2}. Later fetches: {2, 3}. Long intervals keep
    // the tasks asleep; this scenario is about the task set, not samples.
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = fetches.clone();
    server
        .mock("GET", "/deviceMonitor/agent/config/a1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_req| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            let items = if call == 0 {
                r#"[{"itemId":1,"itemName":"a","itemkey":"system.uname","infoType":0,"updateIntervalseconds":3600,"timeout":5,"intervals":null},
                    {"itemId":2,"itemName":"b","itemkey":"system.hostname","infoType":0,"updateIntervalseconds":3600,"timeout":5,"intervals":null}]"#
            } else {
                r#"[{"itemId":2,"itemName":"b","itemkey":"system.hostname","infoType":0,"updateIntervalseconds":3600,"timeout":5,"intervals":null},
                    {"itemId":3,"itemName":"c","itemkey":"system.uptime","infoType":0,"updateIntervalseconds":3600,"timeout":5,"intervals":null}]"#
            };
            config_body(items).into_bytes()
        })
        .expect_at_least(2)
        .create_async()
        .await;

    let mut config = test_config(&server.url());
    config.device_monitor.config_refresh_interval_secs = 1;
    run_for(config, Duration::from_millis(3500)).await;

    assert!(fetches.load(Ordering::SeqCst) >= 2);
}
