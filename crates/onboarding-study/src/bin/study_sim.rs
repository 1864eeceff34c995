use onboarding_study::config::{AddonInfo, ExperimentConfig};
use onboarding_study::host::mocks::RecordingHost;
use onboarding_study::host::Topic;
use onboarding_study::orchestrator::StudyOrchestrator;
use onboarding_study::reason::{LifecycleReason, REASON_TABLE, RawReason};
use onboarding_study::tours::TourPreferenceSet;
use onboarding_study::variation::{VariationChooser, VariationSource};
use serde_json::json;

fn main() {
    if let Err(error) = run(std::env::args().skip(1).collect()) {
        eprintln!("{error}");
        std::process::exit(2);
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    if args.is_empty() {
        return Err(usage());
    }

    match args[0].as_str() {
        "assign" => run_assign(&args[1..]),
        "tours" => run_tours(&args[1..]),
        "reasons" => run_reasons(&args[1..]),
        "simulate" => run_simulate(&args[1..]),
        "help" | "--help" | "-h" => {
            println!("{}", usage());
            Ok(())
        }
        other => Err(format!("unknown subcommand '{other}'\n\n{}", usage())),
    }
}

fn usage() -> String {
    [
        "study_sim usage:",
        "  study_sim assign --config <path> --client-id <id>",
        "  study_sim tours --variation <name>",
        "  study_sim reasons",
        "  study_sim simulate --config <path> --client-id <id> [--starting-up] [--ineligible]",
    ]
    .join("\n")
}

fn run_assign(args: &[String]) -> Result<(), String> {
    let mut config_path: Option<&str> = None;
    let mut client_id: Option<&str> = None;

    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--config" => {
                index += 1;
                config_path = Some(flag_value(args, index, "--config")?);
            }
            "--client-id" => {
                index += 1;
                client_id = Some(flag_value(args, index, "--client-id")?);
            }
            flag => return Err(format!("unknown flag for assign: {flag}")),
        }
        index += 1;
    }

    let config = load_config(config_path.ok_or_else(|| "missing required --config <path>".to_string())?)?;
    let client_id = client_id.ok_or_else(|| "missing required --client-id <id>".to_string())?;

    let mut host = RecordingHost::new().with_telemetry_id(client_id);
    let assignment = VariationChooser::choose(&config.study, &mut host)
        .map_err(|error| format!("variation choice failed [{}]: {error}", error.error_code()))?;
    let fraction = match assignment.source {
        VariationSource::Weighted => Some(
            VariationChooser::fraction_for(config.study_name(), client_id)
                .map_err(|error| format!("hash fraction failed: {error}"))?,
        ),
        VariationSource::StartupConfig => None,
    };
    let tours = TourPreferenceSet::for_assignment(&assignment);

    print_json(&json!({
        "study_name": config.study_name(),
        "client_id": client_id,
        "hash_fraction": fraction,
        "assignment": assignment,
        "tours": tours,
        "tour_order": tours.tour_order_string(),
    }))
}

fn run_tours(args: &[String]) -> Result<(), String> {
    let mut variation: Option<&str> = None;

    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--variation" => {
                index += 1;
                variation = Some(flag_value(args, index, "--variation")?);
            }
            flag => return Err(format!("unknown flag for tours: {flag}")),
        }
        index += 1;
    }

    let variation = variation.ok_or_else(|| "missing required --variation <name>".to_string())?;
    let tours = TourPreferenceSet::for_variation(variation);
    let known = TourPreferenceSet::known_variations().any(|name| name == variation);
    print_json(&json!({
        "variation": variation,
        "default_row": !known,
        "tours": tours,
        "tour_order": tours.tour_order_string(),
    }))
}

fn run_reasons(args: &[String]) -> Result<(), String> {
    if let Some(flag) = args.first() {
        return Err(format!("unknown flag for reasons: {flag}"));
    }
    let table: Vec<_> = REASON_TABLE
        .iter()
        .map(|(reason, code)| json!({"code": code, "name": reason.as_str()}))
        .collect();
    print_json(&json!(table))
}

/// Drives one install, optional deferred start, and a user uninstall
/// against the in-memory host, then prints the event log.
fn run_simulate(args: &[String]) -> Result<(), String> {
    let mut config_path: Option<&str> = None;
    let mut client_id: Option<&str> = None;
    let mut starting_up = false;
    let mut eligible = true;

    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--config" => {
                index += 1;
                config_path = Some(flag_value(args, index, "--config")?);
            }
            "--client-id" => {
                index += 1;
                client_id = Some(flag_value(args, index, "--client-id")?);
            }
            "--starting-up" => starting_up = true,
            "--ineligible" => eligible = false,
            flag => return Err(format!("unknown flag for simulate: {flag}")),
        }
        index += 1;
    }

    let config = load_config(config_path.ok_or_else(|| "missing required --config <path>".to_string())?)?;
    let client_id = client_id.ok_or_else(|| "missing required --client-id <id>".to_string())?;

    let mut host = RecordingHost::new()
        .with_telemetry_id(client_id)
        .with_eligible(eligible)
        .with_starting_up(starting_up);
    let mut study = StudyOrchestrator::new(config).map_err(|error| error.to_string())?;
    let fail = |error: onboarding_study::OrchestratorError| format!("[{}] {error}", error.error_code());

    let install = RawReason::Known(LifecycleReason::AddonInstall);
    let uninstall = RawReason::Known(LifecycleReason::AddonUninstall);
    study.install(install);
    let startup = study
        .startup(&mut host, &AddonInfo::new("onboarding-study@sim", "0.0.0"), install)
        .map_err(fail)?;
    if starting_up {
        host.set_starting_up(false);
        study.handle_notification(&mut host, Topic::BrowserReady).map_err(fail)?;
        study.handle_notification(&mut host, Topic::SessionRestored).map_err(fail)?;
    }
    let first = study.shutdown(&mut host, uninstall).map_err(fail)?;
    let second = study.shutdown(&mut host, uninstall).map_err(fail)?;
    study.uninstall(uninstall);

    print_json(&json!({
        "startup": startup,
        "shutdowns": [first, second],
        "phase": study.phase(),
        "assignment": study.assignment(),
        "host_calls": host.ops(),
        "events": study.events(),
    }))
}

fn flag_value<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn load_config(path: &str) -> Result<ExperimentConfig, String> {
    ExperimentConfig::from_path(path)
        .map_err(|error| format!("failed to load config '{path}' [{}]: {error}", error.error_code()))
}

fn print_json(value: &serde_json::Value) -> Result<(), String> {
    println!(
        "{}",
        serde_json::to_string_pretty(value)
            .map_err(|error| format!("failed to encode output: {error}"))?
    );
    Ok(())
}
