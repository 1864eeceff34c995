#![no_main]

use libfuzzer_sys::fuzz_target;
use onboarding_study::bridge::decode_request;
use onboarding_study::host::MessageTarget;
use onboarding_study::host::mocks::RecordingHost;
use onboarding_study::reason::{LifecycleReason, RawReason};
use onboarding_study::{AddonInfo, ExperimentConfig, InboundMessage, StudyOrchestrator};

const CONFIG: &str = r#"{"study": {"studyName": "fuzz", "variation": {"name": "var1"}}}"#;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let _ = decode_request(&body);

    let Ok(config) = ExperimentConfig::from_json_str(CONFIG) else {
        return;
    };
    let Ok(mut study) = StudyOrchestrator::new(config) else {
        return;
    };
    let mut host = RecordingHost::new();
    if study
        .startup(
            &mut host,
            &AddonInfo::new("fuzz@study", "0.0.0"),
            RawReason::Known(LifecycleReason::AppStartup),
        )
        .is_err()
    {
        return;
    }

    let before = host.prefs().clone();
    let target = MessageTarget(u64::from(data.first().copied().unwrap_or(0)));
    if study
        .handle_content_message(&mut host, &InboundMessage::new(target, body))
        .is_err()
    {
        // A rejected request writes nothing.
        assert_eq!(host.prefs(), &before);
    }
});
