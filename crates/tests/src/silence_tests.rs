//! Silence handling: the 110 → 111 → 112 ladder and the give-up hangup.

use std::time::Duration;

use crate::fixtures::test_gateway::TestGateway;

#[tokio::test]
async fn silence_escalates_to_hangup() {
    let gw = TestGateway::spawn_with(|settings| {
        settings.timers.no_input_timeout_secs = 0.15;
        settings.timers.silence_arm_secs = 0.0;
        settings.timers.give_up_hangup_delay_secs = 0.2;
    })
    .await;
    gw.init_call("call-silent").await.unwrap();

    // no caller audio at all: the ladder walks 110 -> 111 -> 112
    assert!(
        gw.switch.wait_for("/110.wav", Duration::from_secs(3)).await,
        "first silence rung missing"
    );
    assert!(
        gw.switch.wait_for("/111.wav", Duration::from_secs(3)).await,
        "second silence rung missing"
    );
    assert!(
        gw.switch.wait_for("/112.wav", Duration::from_secs(3)).await,
        "give-up line missing"
    );

    // 112 carries auto_hangup; exactly one kill follows
    assert!(
        gw.switch
            .wait_for("uuid_kill call-silent", Duration::from_secs(3))
            .await,
        "no hangup after 112"
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(gw.switch.count_matching("uuid_kill call-silent"), 1);
}

#[tokio::test]
async fn caller_speech_resets_the_ladder() {
    let gw = TestGateway::spawn_with(|settings| {
        settings.timers.no_input_timeout_secs = 0.2;
        settings.timers.silence_arm_secs = 0.0;
        // the ladder legitimately replays 110 after a reset; shrink the
        // duplicate window so the replay is observable
        settings.timers.duplicate_play_window_secs = 0.1;
    })
    .await;
    gw.init_call("call-reset").await.unwrap();

    assert!(
        gw.switch.wait_for("/110.wav", Duration::from_secs(3)).await,
        "ladder never started"
    );

    // caller answers: streak resets, so the next timeout starts over at 110
    gw.speak("call-reset", "もしもし").await;
    assert!(gw.switch.wait_for("/004.wav", Duration::from_secs(2)).await);

    assert!(
        gw.switch
            .wait_for_count("/110.wav", 2, Duration::from_secs(3))
            .await,
        "ladder did not restart from 110 after speech"
    );
    // 112 must not have been reached
    assert_eq!(gw.switch.count_matching("/112.wav"), 0);
}
