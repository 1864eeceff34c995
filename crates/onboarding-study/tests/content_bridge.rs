use onboarding_study::bridge::{
    CONTENT_MESSAGE_CHANNEL, IgnoreReason, LOGIN_STATUS_REPLY_CHANNEL,
};
use onboarding_study::host::mocks::RecordingHost;
use onboarding_study::host::{EndingReason, MessageTarget, Topic};
use onboarding_study::preferences::{PrefType, PreferenceWhitelist};
use onboarding_study::reason::{LifecycleReason, RawReason};
use onboarding_study::{
    AddonInfo, BridgeError, BridgeOutcome, ExperimentConfig, InboundMessage, OrchestratorError,
    PreferenceError, PreferenceGateway, StudyOrchestrator,
};
use serde_json::json;

const CONFIG: &str = r#"{
    "study": {"studyName": "onboarding-study", "variation": {"name": "var1"}},
    "log": {"bootstrap": {"level": "All"}}
}"#;

fn running(host: &mut RecordingHost) -> StudyOrchestrator {
    let mut study =
        StudyOrchestrator::new(ExperimentConfig::from_json_str(CONFIG).expect("config")).expect("study");
    study
        .startup(
            host,
            &AddonInfo::new("onboarding@shield.mozilla.org", "1.0.3"),
            RawReason::Known(LifecycleReason::AppStartup),
        )
        .expect("startup");
    study
}

fn message(target: u64, data: serde_json::Value) -> InboundMessage {
    InboundMessage::new(MessageTarget(target), data)
}

#[test]
fn bridge_listens_once_onboarding_starts() {
    let mut host = RecordingHost::new();
    let study = running(&mut host);
    assert!(study.bridge().is_listening());
    assert_eq!(host.listener_count(CONTENT_MESSAGE_CHANNEL), 1);
}

#[test]
fn set_prefs_writes_whitelisted_entries_in_order() {
    let mut host = RecordingHost::new();
    let mut study = running(&mut host);
    host.clear_calls();

    let outcome = study
        .handle_content_message(
            &mut host,
            &message(
                1,
                json!({
                    "action": "set-prefs",
                    "params": [
                        {"name": "browser.onboarding.notification.prompt-count", "value": 3},
                        {"name": "browser.onboarding.tour.onboarding-tour-addons.completed", "value": true},
                        {"name": "browser.onboarding.notification.tour-ids-queue", "value": "addons,sync"}
                    ]
                }),
            ),
        )
        .expect("set-prefs");

    let BridgeOutcome::PrefsApplied { report } = outcome else {
        panic!("expected PrefsApplied, got {outcome:?}");
    };
    assert_eq!(report.applied.len(), 3);
    assert!(report.skipped.is_empty());
    assert_eq!(host.ops(), vec!["set_pref", "set_pref", "set_pref"]);

    let prefs = host.prefs();
    assert_eq!(prefs.get_int("browser.onboarding.notification.prompt-count"), Some(3));
    assert_eq!(
        prefs.get_bool("browser.onboarding.tour.onboarding-tour-addons.completed"),
        Some(true)
    );
    assert_eq!(
        prefs.get_string("browser.onboarding.notification.tour-ids-queue"),
        Some("addons,sync")
    );
}

#[test]
fn names_outside_the_whitelist_are_skipped() {
    let mut host = RecordingHost::new();
    let mut study = running(&mut host);

    let outcome = study
        .handle_content_message(
            &mut host,
            &message(
                1,
                json!({
                    "action": "set-prefs",
                    "params": [
                        {"name": "browser.startup.homepage", "value": "https://example.org"},
                        {"name": "browser.onboarding.hidden", "value": true}
                    ]
                }),
            ),
        )
        .expect("set-prefs");

    let BridgeOutcome::PrefsApplied { report } = outcome else {
        panic!("expected PrefsApplied, got {outcome:?}");
    };
    assert_eq!(report.applied, vec!["browser.onboarding.hidden"]);
    assert_eq!(report.skipped, vec!["browser.startup.homepage"]);
    assert_eq!(host.prefs().get_string("browser.startup.homepage"), None);
}

#[test]
fn type_mismatch_rejects_the_whole_request() {
    let mut host = RecordingHost::new();
    let mut study = running(&mut host);
    let before = host.prefs().write_count();

    let err = study
        .handle_content_message(
            &mut host,
            &message(
                1,
                json!({
                    "action": "set-prefs",
                    "params": [
                        {"name": "browser.onboarding.hidden", "value": true},
                        {"name": "browser.onboarding.notification.prompt-count", "value": "three"}
                    ]
                }),
            ),
        )
        .expect_err("mismatch");

    assert!(matches!(
        err,
        OrchestratorError::Bridge(BridgeError::Preference(PreferenceError::TypeMismatch {
            expected: PrefType::Int,
            ..
        }))
    ));
    assert_eq!(err.error_code(), "STUDY-BRIDGE-0002");
    assert_eq!(host.prefs().write_count(), before);
    assert_eq!(host.prefs().get_bool("browser.onboarding.hidden"), None);
    assert!(study
        .events()
        .iter()
        .any(|event| event.event == "content_message_failed"));
}

#[test]
fn integer_outside_i32_is_a_mismatch() {
    let mut host = RecordingHost::new();
    let mut study = running(&mut host);
    let err = study
        .handle_content_message(
            &mut host,
            &message(
                1,
                json!({
                    "action": "set-prefs",
                    "params": [{"name": "browser.onboarding.notification.prompt-count", "value": 4_294_967_296_i64}]
                }),
            ),
        )
        .expect_err("overflow");
    assert_eq!(err.error_code(), "STUDY-BRIDGE-0002");
}

#[test]
fn login_status_is_sent_back_to_the_requesting_frame() {
    let mut host = RecordingHost::new();
    let mut study = running(&mut host);

    let outcome = study
        .handle_content_message(&mut host, &message(7, json!({"action": "get-login-status"})))
        .expect("login status");
    assert_eq!(outcome, BridgeOutcome::LoginStatusSent { is_logged_in: false });

    study
        .handle_notification(&mut host, Topic::AuthLogin)
        .expect("login");
    study
        .handle_content_message(&mut host, &message(9, json!({"action": "get-login-status"})))
        .expect("login status");

    assert_eq!(
        host.sent_messages(LOGIN_STATUS_REPLY_CHANNEL),
        vec![
            (MessageTarget(7), json!({"isLoggedIn": false})),
            (MessageTarget(9), json!({"isLoggedIn": true})),
        ]
    );
}

#[test]
fn unknown_action_is_ignored_without_side_effects() {
    let mut host = RecordingHost::new();
    let mut study = running(&mut host);
    host.clear_calls();

    let outcome = study
        .handle_content_message(&mut host, &message(1, json!({"action": "open-about-addons"})))
        .expect("unknown");
    assert_eq!(
        outcome,
        BridgeOutcome::Ignored {
            reason: IgnoreReason::UnknownAction {
                action: "open-about-addons".to_string()
            }
        }
    );
    assert!(host.calls().is_empty());
}

#[test]
fn malformed_body_is_an_error() {
    let mut host = RecordingHost::new();
    let mut study = running(&mut host);
    let err = study
        .handle_content_message(&mut host, &message(1, json!(["set-prefs"])))
        .expect_err("malformed");
    assert_eq!(err.error_code(), "STUDY-BRIDGE-0001");
}

#[test]
fn messages_after_ending_are_ignored() {
    let mut host = RecordingHost::new();
    let mut study = running(&mut host);
    study
        .end_study(&mut host, EndingReason::UserDisable)
        .expect("end");
    host.clear_calls();

    let outcome = study
        .handle_content_message(
            &mut host,
            &message(
                1,
                json!({"action": "set-prefs", "params": [{"name": "browser.onboarding.hidden", "value": true}]}),
            ),
        )
        .expect("ignored");
    assert_eq!(
        outcome,
        BridgeOutcome::Ignored {
            reason: IgnoreReason::StudyEnding
        }
    );
    assert!(host.calls().is_empty());
}

#[test]
fn messages_before_start_are_ignored() {
    let mut host = RecordingHost::new().with_starting_up(true);
    let mut study = running(&mut host);
    assert!(!study.bridge().is_listening());

    let outcome = study
        .handle_content_message(&mut host, &message(1, json!({"action": "get-login-status"})))
        .expect("ignored");
    assert_eq!(
        outcome,
        BridgeOutcome::Ignored {
            reason: IgnoreReason::NotListening
        }
    );
    assert!(host.sent_messages(LOGIN_STATUS_REPLY_CHANNEL).is_empty());
}

#[test]
fn listener_is_removed_on_shutdown() {
    let mut host = RecordingHost::new();
    let mut study = running(&mut host);
    study
        .shutdown(&mut host, RawReason::Known(LifecycleReason::AppShutdown))
        .expect("shutdown");
    assert!(!study.bridge().is_listening());
    assert_eq!(host.listener_count(CONTENT_MESSAGE_CHANNEL), 0);
}

#[test]
fn custom_whitelist_replaces_the_default() {
    let gateway = PreferenceGateway::new(
        PreferenceWhitelist::from_tagged([("browser.onboarding.custom", "string")])
            .expect("whitelist"),
    );
    let mut host = RecordingHost::new();
    let mut study =
        StudyOrchestrator::new(ExperimentConfig::from_json_str(CONFIG).expect("config"))
            .expect("study")
            .with_gateway(gateway);
    study
        .startup(
            &mut host,
            &AddonInfo::new("onboarding@shield.mozilla.org", "1.0.3"),
            RawReason::Known(LifecycleReason::AppStartup),
        )
        .expect("startup");

    let outcome = study
        .handle_content_message(
            &mut host,
            &message(
                1,
                json!({"action": "set-prefs", "params": [
                    {"name": "browser.onboarding.custom", "value": "x"},
                    {"name": "browser.onboarding.hidden", "value": true}
                ]}),
            ),
        )
        .expect("set-prefs");
    let BridgeOutcome::PrefsApplied { report } = outcome else {
        panic!("expected PrefsApplied, got {outcome:?}");
    };
    assert_eq!(report.applied, vec!["browser.onboarding.custom"]);
    assert_eq!(report.skipped, vec!["browser.onboarding.hidden"]);
}
