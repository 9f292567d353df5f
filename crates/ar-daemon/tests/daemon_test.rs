//! Daemon-level integration: the real dispatcher loop drives the erasure
//! machine end to end through its self-scheduled steps.

use ar_core::config::Config;
use ar_core::types::DeletionJobStatus;
use ar_daemon::Daemon;
use std::time::Duration;

fn memory_config() -> Config {
    let mut config = Config::default();
    config.store.path = ":memory:".into();
    config.auth.disabled = true;
    config.environment = "development".into();
    config
}

#[tokio::test]
async fn refuses_auth_bypass_outside_development() {
    let mut config = memory_config();
    config.environment = "production".into();
    assert!(Daemon::new(config).await.is_err());
}

#[tokio::test]
async fn dispatcher_drives_erasure_to_completion() {
    let daemon = Daemon::new(memory_config()).await.unwrap();
    let engine = daemon.engine().clone();
    let shutdown = daemon.shutdown_handle();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = tokio::spawn(daemon.run_with_listener(listener));

    // Seed a small project and confirm its erasure.
    let project = engine.create_project(None, "ephemeral").await.unwrap();
    let run = engine
        .create_run(None, project.id, "custom", None, None)
        .await
        .unwrap();
    let events: Vec<_> = (0..30)
        .map(|i| ar_engine::run_events::RunEventInput {
            ts: i,
            level: "info".into(),
            message: format!("event {i}"),
            data: None,
            redacted: None,
        })
        .collect();
    engine.append_run_events(None, run.id, events).await.unwrap();

    let receipt = engine.delete_start(None, project.id).await.unwrap();
    let job_id = engine
        .delete_confirm(None, project.id, &receipt.token, "delete ephemeral")
        .await
        .unwrap();

    // The dispatcher executes the 500 ms self-scheduled steps; wait for the
    // machine to reach a terminal state.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let status = engine.delete_status(None, job_id).await.unwrap();
        if status.status == DeletionJobStatus::Completed {
            break;
        }
        assert_ne!(status.status, DeletionJobStatus::Failed, "erasure failed: {status:?}");
        assert!(
            tokio::time::Instant::now() < deadline,
            "erasure did not complete in time (stage {:?})",
            status.stage
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    assert!(engine.store().get_project(project.id).await.unwrap().is_none());
    assert_eq!(
        engine
            .store()
            .count_by_project("run_events", project.id)
            .await
            .unwrap(),
        0
    );

    shutdown.trigger();
    let _ = server.await;
}

#[tokio::test]
async fn server_answers_healthz_and_stops_on_shutdown() {
    let daemon = Daemon::new(memory_config()).await.unwrap();
    let shutdown = daemon.shutdown_handle();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(daemon.run_with_listener(listener));

    // Raw HTTP/1.1 request over a plain socket keeps the test dependency-free.
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("\"ok\":true"));

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop after shutdown")
        .unwrap()
        .unwrap();
}
