#![no_main]

use libfuzzer_sys::fuzz_target;
use onboarding_study::host::mocks::{HostCall, RecordingHost};
use onboarding_study::host::{EndingReason, Topic};
use onboarding_study::reason::RawReason;
use onboarding_study::{AddonInfo, ExperimentConfig, StudyOrchestrator};

const MAX_STEPS: usize = 64;
const CONFIG: &str = r#"{
    "study": {
        "studyName": "fuzz",
        "weightedVariations": [{"name": "var1"}, {"name": "var2"}, {"name": "var3"}, {"name": "var4"}]
    },
    "modules": ["a.jsm"],
    "configModules": ["Config.jsm"]
}"#;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    run_lifecycle_program(data);
});

fn run_lifecycle_program(data: &[u8]) {
    let Ok(config) = ExperimentConfig::from_json_str(CONFIG) else {
        return;
    };
    let Ok(mut study) = StudyOrchestrator::new(config) else {
        return;
    };
    let mut host = RecordingHost::new()
        .with_telemetry_id(&format!("client-{}", data[0]))
        .with_starting_up(data[0] % 2 == 0)
        .with_eligible(data[0] % 5 != 0);
    let addon = AddonInfo::new("fuzz@study", "0.0.0");

    for &step in data.iter().skip(1).take(MAX_STEPS) {
        let reason = RawReason::from_code(i64::from(step >> 4) % 10);
        let _ = match step % 6 {
            0 => study.startup(&mut host, &addon, reason).map(|_| ()),
            1 => study.shutdown(&mut host, reason).map(|_| ()),
            2 => study
                .handle_notification(&mut host, Topic::ALL[usize::from(step >> 3) % Topic::ALL.len()])
                .map(|_| ()),
            3 => study
                .end_study(&mut host, EndingReason::Expired)
                .map(|_| ()),
            4 => {
                host.set_starting_up(step & 0x40 != 0);
                Ok(())
            }
            _ => {
                host.set_signed_in_user((step & 0x80 != 0).then_some("fuzz@example.org"));
                Ok(())
            }
        };

        assert!(host.count_op("end_study") <= 1);
        let unloads = host
            .calls()
            .iter()
            .filter(|call| matches!(call, HostCall::UnloadModule(path) if path == "a.jsm"))
            .count();
        assert!(unloads <= 1);
    }
}
