use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use rollcall_core::Config;
use rollcall_daemon::{paths, request_status, request_stop, run, DaemonError};
use tempfile::TempDir;

fn wait_for_status(home: PathBuf) -> Result<serde_json::Value, DaemonError> {
    let mut last = None;
    for _ in 0..20 {
        match request_status(&home) {
            Ok(status) => return Ok(status),
            Err(err) => last = Some(err),
        }
        sleep(Duration::from_millis(50));
    }
    Err(last.unwrap_or(DaemonError::Protocol("no status attempt made".into())))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_serves_status_then_stops_on_request() {
    let home = TempDir::new().expect("home");
    let mut config = Config::default();
    config.server.bind = "127.0.0.1:0".to_string();

    let daemon = tokio::spawn(run(home.path().to_path_buf(), config));

    let client_home = home.path().to_path_buf();
    let status = tokio::task::spawn_blocking(move || {
        let status = wait_for_status(client_home.clone())?;
        request_stop(&client_home)?;
        Ok::<_, DaemonError>(status)
    })
    .await
    .expect("join")
    .expect("status");

    assert_eq!(status["running"], true);
    assert!(status["bind"]
        .as_str()
        .is_some_and(|bind| bind.starts_with("127.0.0.1:")));

    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits")
        .expect("join")
        .expect("clean shutdown");
    assert!(!paths::socket_path(home.path()).exists());
}

#[tokio::test]
async fn bad_bind_address_fails_fast() {
    let home = TempDir::new().expect("home");
    let mut config = Config::default();
    config.server.bind = "not-an-address".to_string();

    let err = run(home.path().to_path_buf(), config).await.unwrap_err();
    assert!(matches!(err, DaemonError::Bind(ref addr) if addr == "not-an-address"));
}
