//! Audio-side behavior observable through the softswitch: partial/final
//! merging, missing-audio fallback, and barge-in interruption.

use std::time::Duration;

use libertycall_gateway::playback::PlayItem;
use libertycall_media::ulaw_encode;

use crate::fixtures::test_gateway::TestGateway;

#[tokio::test]
async fn empty_final_falls_back_to_the_partial() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-merge").await.unwrap();

    // the recognizer heard the caller but committed an empty final
    gw.partial("call-merge", "もし").await;
    gw.partial("call-merge", "もしもし").await;
    gw.speak("call-merge", "").await;

    assert!(
        gw.switch.wait_for("/004.wav", Duration::from_secs(2)).await,
        "partial text was not used for the dialogue turn"
    );
    assert!(gw.switch.wait_for("/005.wav", Duration::from_secs(2)).await);
    // the empty final must not have driven the silence ladder
    assert_eq!(gw.switch.count_matching("/110.wav"), 0);
}

#[tokio::test]
async fn missing_template_audio_substitutes_fallback() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-miss").await.unwrap();

    // AI_CALL_TOPIC selects "0600", which has no WAV in the seeded client;
    // the coordinator substitutes the configured fallback "001"
    gw.speak("call-miss", "AI電話の件でお電話しました").await;
    assert!(
        gw.switch.wait_for("/001.wav", Duration::from_secs(2)).await,
        "fallback audio not played"
    );
    assert_eq!(gw.switch.count_matching("/0600.wav"), 0);
    // the appended follow-up still plays normally
    assert!(gw.switch.wait_for("/085.wav", Duration::from_secs(2)).await);
}

#[tokio::test]
async fn caller_speech_interrupts_playback() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-barge").await.unwrap();

    // a long line the mock never completes, so it stays "playing"
    let slow = gw
        .state
        .settings
        .paths
        .clients_root
        .join("000")
        .join("audio")
        .join("slow_line.wav");
    std::fs::write(&slow, vec![0u8; 44 + 80_000]).unwrap(); // ~5 s estimate
    let session = gw.session("call-barge");
    session
        .playback
        .play(
            vec![PlayItem {
                template_id: "098".to_string(),
                path: slow,
                wait_after: None,
                auto_hangup: false,
            }],
            false,
            false,
        )
        .await;
    assert!(
        gw.switch
            .wait_for("slow_line.wav", Duration::from_secs(2))
            .await,
        "slow line never started"
    );

    // loud caller frames while the line plays trigger a break
    let voice: Vec<i16> = (0..160)
        .map(|i| (((i as f32) * 0.4).sin() * 12000.0) as i16)
        .collect();
    let frame = ulaw_encode(&voice);
    for _ in 0..20 {
        session.push_audio(frame.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        if gw.switch.count_matching("uuid_break call-barge") > 0 {
            break;
        }
    }
    assert!(
        gw.switch
            .wait_for("uuid_break call-barge", Duration::from_secs(2))
            .await,
        "barge-in did not break playback"
    );
}
