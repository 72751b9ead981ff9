//! The scenario files shipped in `scenarios/` parse and pass a rehearsal.

use std::path::PathBuf;
use std::sync::Arc;

use gatecheck_adapters::MemoryGateway;
use gatecheck_harness::{builtin, RunOptions, Runner, Scenario};

fn scenario_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../scenarios")
}

fn shipped() -> Vec<(PathBuf, Scenario)> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(scenario_dir())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();
    files
        .into_iter()
        .map(|path| {
            let scenario = Scenario::from_file(&path)
                .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
            (path, scenario)
        })
        .collect()
}

#[test]
fn test_shipped_scenarios_parse() {
    assert!(shipped().len() >= 2);
}

#[test]
fn test_shipped_ownership_transfer_matches_builtin() {
    let (_, from_file) = shipped()
        .into_iter()
        .find(|(_, s)| s.name() == "ownership-transfer")
        .unwrap();
    let builtin = builtin("ownership-transfer").unwrap();
    assert_eq!(from_file.probes(), builtin.probes());
    assert_eq!(from_file.principals(), builtin.principals());
}

#[tokio::test]
async fn test_shipped_scenarios_pass_rehearsal() {
    for (path, scenario) in shipped() {
        for namespace in [None, Some("rehearsal".to_string())] {
            let gw = MemoryGateway::new();
            let options = RunOptions { namespace, ..RunOptions::default() };
            let runner = Runner::new(Arc::new(gw.clone()), Arc::new(gw.clone()), options);

            let report = runner.run(&scenario).await;
            assert!(report.passed(), "{}:\n{report}", path.display());
            assert!(gw.principals().is_empty());
        }
    }
}
