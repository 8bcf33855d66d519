//! Replays the bundled demo fixture through a full investigation

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chain_sleuth::automation::ScriptedAutomation;
use chain_sleuth::config::Config;
use chain_sleuth::events::InvestigationEvent;
use chain_sleuth::graph::NodeCategory;
use chain_sleuth::strategy::InvestigationState;
use chain_sleuth::{ExplorerRegistry, Investigation, StrategyId};
use pretty_assertions::assert_eq;

const SUBJECT: &str = "0x7a16fF8270133F063aAb6C9977183D9e72835428";

fn demo_fixture() -> ScriptedAutomation {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/demo.yaml");
    ScriptedAutomation::from_fixture_file(&path).unwrap()
}

#[tokio::test]
async fn test_demo_fixture_investigation() {
    let mut config = Config::default();
    config.failsafe.retry.enabled = false;
    config.failsafe.rate_limit.enabled = false;
    config.scheduler.advance_delay = Duration::from_millis(5);

    let investigation = Arc::new(Investigation::new(
        &config,
        Arc::new(demo_fixture()),
        ExplorerRegistry::builtin(),
    ));
    let mut events = investigation.events().subscribe();

    investigation.submit(SUBJECT).unwrap();
    investigation.add_strategy(StrategyId::CounterpartyScan).unwrap();
    investigation.start().unwrap();

    let mut found = None;
    let wait = async {
        while let Ok(envelope) = events.recv().await {
            match envelope.event {
                InvestigationEvent::TransactionsFound { count, .. } => found = Some(count),
                InvestigationEvent::InvestigationCompleted { .. } => break,
                _ => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait).await.unwrap();
    assert_eq!(investigation.state(), InvestigationState::Completed);
    assert_eq!(found, Some(4));

    let graph = investigation.graph().snapshot();
    assert_eq!(graph.node_count(), 5);
    assert_eq!(graph.edge_count(), 4);
    assert_eq!(graph.node(SUBJECT).unwrap().category, NodeCategory::Main);

    let category = |id: &str| graph.node(id).map(|n| n.category);
    assert_eq!(
        category("0xd90e2f925da726b50c4ed8d0fb90ad053324f31b"),
        Some(NodeCategory::Mixer)
    );
    assert_eq!(
        category("0x28c6c06298d514db089934071355e5743bf21d60"),
        Some(NodeCategory::Cex)
    );
    assert_eq!(
        category("0x4ad64983349c49defe8d7a4686202d24b25d0ce8"),
        Some(NodeCategory::AltWallet)
    );
    assert_eq!(
        category("0x3f5ce5fbfe3e9af3971dd833d26ba9b5c936f0be"),
        Some(NodeCategory::Unknown)
    );

    // Incoming transfer keeps its direction
    let incoming: Vec<_> = graph
        .edges()
        .filter(|e| e.target == SUBJECT)
        .map(|e| e.source.clone())
        .collect();
    assert_eq!(incoming, vec!["0x3f5ce5fbfe3e9af3971dd833d26ba9b5c936f0be".to_string()]);
}
