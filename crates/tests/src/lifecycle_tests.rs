//! Lifecycle plumbing: init idempotency, teardown, session artifacts, and
//! the JSON control channel.

use std::time::Duration;

use libertycall_gateway::lifecycle::{self, InitParams};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::fixtures::test_gateway::TestGateway;

#[tokio::test]
async fn duplicate_init_is_a_noop() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-dup-init").await.unwrap();
    let records_before = gw.switch.count_matching("uuid_record call-dup-init start");
    assert_eq!(records_before, 1);

    lifecycle::on_init(
        &gw.state,
        InitParams {
            call_id: "call-dup-init".to_string(),
            ..InitParams::default()
        },
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        gw.switch.count_matching("uuid_record call-dup-init start"),
        1,
        "duplicate init restarted the call"
    );
    assert_eq!(gw.state.registry.active_count(), 1);
}

#[tokio::test]
async fn hangup_tears_down_and_writes_summary() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-bye").await.unwrap();
    gw.speak("call-bye", "もしもし").await;
    assert!(gw.switch.wait_for("/004.wav", Duration::from_secs(2)).await);

    lifecycle::on_hangup(&gw.state, "call-bye").await.unwrap();
    assert!(
        gw.switch
            .wait_for("uuid_kill call-bye", Duration::from_secs(2))
            .await
    );
    // recording stopped on the way out
    assert!(
        gw.switch
            .wait_for("uuid_record call-bye stop", Duration::from_secs(2))
            .await
    );

    // session is gone; a second hangup is an unknown-call error, not a crash
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while gw.state.registry.get("call-bye").is_some() {
        assert!(tokio::time::Instant::now() < deadline, "teardown never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(lifecycle::on_hangup(&gw.state, "call-bye").await.is_err());
    assert_eq!(gw.switch.count_matching("uuid_kill call-bye"), 1);

    // summary.json landed under sessions/<date>/<client>/session_*/
    let sessions_root = gw.state.settings.paths.sessions_root.clone();
    let mut summaries = Vec::new();
    for date_dir in std::fs::read_dir(&sessions_root).unwrap().flatten() {
        for client_dir in std::fs::read_dir(date_dir.path()).unwrap().flatten() {
            for session_dir in std::fs::read_dir(client_dir.path()).unwrap().flatten() {
                let summary = session_dir.path().join("summary.json");
                if summary.exists() {
                    summaries.push(summary);
                }
            }
        }
    }
    assert_eq!(summaries.len(), 1, "exactly one summary expected");
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summaries[0]).unwrap()).unwrap();
    assert_eq!(summary["uuid"], "call-bye");
    assert_eq!(summary["client_id"], "000");
    assert!(summary["total_phrases"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn calls_are_isolated() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-a").await.unwrap();
    gw.init_call("call-b").await.unwrap();
    assert_eq!(gw.state.registry.active_count(), 2);

    gw.speak("call-a", "担当者お願いします").await;
    assert!(
        gw.switch
            .wait_for("uuid_broadcast call-a", Duration::from_secs(2))
            .await
    );
    gw.speak("call-a", "はい").await;
    assert!(
        gw.switch
            .wait_for("uuid_transfer call-a", Duration::from_secs(3))
            .await
    );

    // call-b saw none of call-a's handoff
    assert_eq!(gw.switch.count_matching("uuid_transfer call-b"), 0);
    assert_eq!(gw.switch.count_matching("/0604.wav"), 1);

    gw.speak("call-b", "もしもし").await;
    assert!(
        gw.switch
            .wait_for("uuid_broadcast call-b", Duration::from_secs(2))
            .await
    );
    assert_eq!(gw.state.registry.active_count(), 2);
}

#[tokio::test]
async fn control_channel_speaks_json() {
    let gw = TestGateway::spawn_with(|settings| {
        // grab an ephemeral port for the control listener
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        settings.network.init_port = probe.local_addr().unwrap().port();
    })
    .await;

    let state = gw.state.clone();
    tokio::spawn(async move {
        let _ = libertycall_gateway::ingress::init::run_control_listener(state).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stream = tokio::net::TcpStream::connect((
        "127.0.0.1",
        gw.state.settings.network.init_port,
    ))
    .await
    .expect("control connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(
            br#"{"op":"init","call_id":"call-ctl","caller_number":"0311112222","client_id":"000"}
"#,
        )
        .await
        .unwrap();
    let reply: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["ok"], true);
    assert!(gw.state.registry.get("call-ctl").is_some());

    // unknown op is rejected but the connection stays usable
    write_half
        .write_all(b"{\"op\":\"reboot\"}\n")
        .await
        .unwrap();
    let reply: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["ok"], false);

    write_half
        .write_all(br#"{"op":"hangup","call_id":"call-ctl"}
"#)
        .await
        .unwrap();
    let reply: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["ok"], true);
    assert!(
        gw.switch
            .wait_for("uuid_kill call-ctl", Duration::from_secs(2))
            .await
    );
}
