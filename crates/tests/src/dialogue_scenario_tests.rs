//! End-to-end dialogue scenarios against the in-process gateway: injected
//! transcripts in, softswitch commands out.

use std::time::Duration;

use crate::fixtures::test_gateway::TestGateway;

#[tokio::test]
async fn greeting_then_passive_inquiry() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-greet").await.unwrap();

    gw.speak("call-greet", "もしもし").await;
    assert!(
        gw.switch
            .wait_for("uuid_broadcast call-greet", Duration::from_secs(2))
            .await
    );
    assert!(gw.switch.wait_for("/004.wav", Duration::from_secs(2)).await);
    assert!(gw.switch.wait_for("/005.wav", Duration::from_secs(2)).await);

    gw.speak("call-greet", "ちょっと検討中なんですけど").await;
    let probed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if gw.switch.count_matching("/089.wav") + gw.switch.count_matching("/090.wav") > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(probed.is_ok(), "passive inquiry probe (089/090) not played");
}

#[tokio::test]
async fn explicit_handoff_yes_transfers_once() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-yes").await.unwrap();

    gw.speak("call-yes", "担当者お願いします").await;
    assert!(gw.switch.wait_for("/0604.wav", Duration::from_secs(2)).await);

    gw.speak("call-yes", "はい").await;
    assert!(gw.switch.wait_for("/081.wav", Duration::from_secs(2)).await);
    assert!(gw.switch.wait_for("/082.wav", Duration::from_secs(2)).await);

    assert!(
        gw.switch
            .wait_for("uuid_transfer call-yes 08024152649", Duration::from_secs(3))
            .await,
        "transfer command not issued"
    );
    // caller id rewritten before the transfer
    assert_eq!(
        gw.switch
            .count_matching("uuid_setvar call-yes effective_caller_id_number 58304073"),
        1
    );

    // a repeated external transfer request must not produce a second command
    let session = gw.session("call-yes");
    let _ = session
        .events_tx
        .send(libertycall_gateway::session::SessionEvent::TransferRequested)
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        gw.switch.count_matching("uuid_transfer call-yes"),
        1,
        "transfer is one-shot per call"
    );
}

#[tokio::test]
async fn explicit_handoff_no_hangs_up() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-no").await.unwrap();

    gw.speak("call-no", "担当者お願いします").await;
    assert!(gw.switch.wait_for("/0604.wav", Duration::from_secs(2)).await);

    gw.speak("call-no", "結構です").await;
    assert!(gw.switch.wait_for("/086.wav", Duration::from_secs(2)).await);
    assert!(gw.switch.wait_for("/087.wav", Duration::from_secs(2)).await);

    // the wind-down timer (shortened in the fixture) fires a single kill
    assert!(
        gw.switch
            .wait_for("uuid_kill call-no", Duration::from_secs(3))
            .await,
        "auto-hangup never fired"
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gw.switch.count_matching("uuid_kill call-no"), 1);
    assert_eq!(gw.switch.count_matching("uuid_transfer call-no"), 0);
}

#[tokio::test]
async fn handoff_done_never_reproposes_0604_or_104() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-done").await.unwrap();

    gw.speak("call-done", "担当者お願いします").await;
    assert!(gw.switch.wait_for("/0604.wav", Duration::from_secs(2)).await);
    gw.speak("call-done", "はい").await;
    assert!(
        gw.switch
            .wait_for("uuid_transfer call-done", Duration::from_secs(3))
            .await
    );

    let broadcasts_before_0604 = gw.switch.count_matching("/0604.wav");
    let broadcasts_before_104 = gw.switch.count_matching("/104.wav");

    gw.speak("call-done", "他の店舗でも使えますか").await;
    assert!(gw.switch.wait_for("/069.wav", Duration::from_secs(2)).await);

    assert_eq!(gw.switch.count_matching("/0604.wav"), broadcasts_before_0604);
    assert_eq!(gw.switch.count_matching("/104.wav"), broadcasts_before_104);
}

#[tokio::test]
async fn duplicate_final_is_processed_once() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-dup").await.unwrap();

    gw.speak("call-dup", "もしもし").await;
    assert!(gw.switch.wait_for("/004.wav", Duration::from_secs(2)).await);
    let count = gw.switch.count_matching("/004.wav");

    gw.speak("call-dup", "もしもし").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        gw.switch.count_matching("/004.wav"),
        count,
        "identical final replayed the greeting"
    );
}

#[tokio::test]
async fn short_partial_fires_backchannel_but_no_dialogue() {
    let gw = TestGateway::spawn().await;
    gw.init_call("call-bc").await.unwrap();
    let before = gw.switch.count_matching("uuid_broadcast");

    gw.partial("call-bc", "えっと").await;
    assert!(
        gw.switch.wait_for("/003.wav", Duration::from_secs(2)).await,
        "backchannel not played"
    );
    // no dialogue templates were selected for the partial
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after = gw.switch.count_matching("uuid_broadcast");
    assert_eq!(after, before + 1, "partial must only trigger the backchannel");
}

mod unclear_streak_scenario {
    //! Scenario 4 runs at the engine level: it presupposes
    //! `handoff_prompt_sent` without a prior 0604 turn.

    use libertycall_dialogue::engine::{DialogueEngine, EngineConfig};
    use libertycall_dialogue::state::{ConversationState, HandoffState, Phase};

    #[test]
    fn two_unknowns_force_auto_handoff() {
        let engine = DialogueEngine::new(EngineConfig::default());
        let mut state = ConversationState::new();
        state.phase = Phase::Qa;
        state.handoff_prompt_sent = true;

        let first = engine.generate_reply("c4", &mut state, "不明な発話", true);
        assert_eq!(first.template_ids, vec!["110"]);
        assert_eq!(state.unclear_streak, 1);

        let second = engine.generate_reply("c4", &mut state, "聞き取れない", true);
        assert_eq!(second.template_ids, vec!["0604"]);
        assert_eq!(state.handoff_state, HandoffState::Confirming);
        assert_eq!(state.meta.get("reason_for_handoff").unwrap(), "auto_unclear");
        assert_eq!(state.meta.get("unclear_streak_at_trigger").unwrap(), "2");
    }
}
