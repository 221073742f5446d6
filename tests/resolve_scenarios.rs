//! Resolution scenarios over the proposal chain
//!
//! Run with: `cargo test --test resolve_scenarios`

mod common;

use async_trait::async_trait;
use common::{directory, instrument, logon, policy_tables, proposal, proposal_chain};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use uploadmeta::{
    is_valid, is_valid_from, unresolved, wire, CancellationToken, Filter, LookupClient, LookupError, MetaNode,
    MockLookupClient, NodeId, NodeOutcome, NodeRegistry, NodeState, RegistryError, ResolveError, Resolver, Row,
};

fn id(s: &str) -> NodeId {
    NodeId::from(s)
}

fn positions(registry: &NodeRegistry) -> Vec<Option<NodeId>> {
    registry.iter().map(|r| r.id().cloned()).collect()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn proposal_directory_resolves_through_chain() {
    let client = Arc::new(policy_tables());
    let mut registry = proposal_chain();
    let before = positions(&registry);

    let report = Resolver::new(client.clone())
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap();

    let proposal = registry.node(&id("ProposalByInstrument")).unwrap();
    assert!(proposal.is_resolved());
    assert_eq!(proposal.value, Some(json!("1234a")));
    assert_eq!(registry.node(&id("ProposalDirectory")).unwrap().value, Some(json!("1234a")));
    assert!(is_valid(&registry));
    assert!(is_valid_from(&registry, &id("ProposalDirectory")).unwrap());

    // Nodes keep their registry positions
    assert_eq!(positions(&registry), before);

    // Each reachable node is visited exactly once
    assert_eq!(report.visited(), 4);
    let distinct: HashSet<_> = report.outcomes.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(distinct.len(), 4);
    assert_eq!(report.outcome(&id("logon")), Some(NodeOutcome::Skipped));
    assert_eq!(report.outcome(&id("instrumentByID")), Some(NodeOutcome::Skipped));
    assert_eq!(report.outcome(&id("ProposalByInstrument")), Some(NodeOutcome::Resolved));
    assert_eq!(report.outcome(&id("ProposalDirectory")), Some(NodeOutcome::Resolved));
    assert!(!report.cancelled);

    // Lookups are issued in dependency order with upstream values as filters
    let calls = client.calls();
    assert_eq!(report.lookups, 2);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].table, "proposals");
    assert_eq!(calls[0].filter["instrument_id"], json!(54));
    assert_eq!(calls[0].fields, vec!["title", "_id"]);
    assert_eq!(calls[1].filter["_id"], json!("1234a"));
}

#[tokio::test]
async fn resolved_chain_yields_directory_path() {
    let mut registry = proposal_chain();
    Resolver::new(Arc::new(policy_tables()))
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap();

    assert_eq!(registry.directory_path(), "Proposal 1234a");
    let proposal = registry.node(&id("ProposalByInstrument")).unwrap();
    assert_eq!(proposal.display_text().as_deref(), Some("1234a Pacifica Development"));
}

#[tokio::test]
async fn re_resolving_is_stable() {
    let client = Arc::new(policy_tables());
    let resolver = Resolver::new(client.clone());
    let mut registry = proposal_chain();

    resolver.resolve(&mut registry, &id("ProposalDirectory")).await.unwrap();
    let snapshot = registry.clone();

    let report = resolver.resolve(&mut registry, &id("ProposalDirectory")).await.unwrap();
    assert_eq!(registry, snapshot);
    assert_eq!(report.lookups, 0);
    assert_eq!(report.with_outcome(NodeOutcome::Skipped).len(), 4);
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn resolving_mid_chain_leaves_dependents_alone() {
    let mut registry = proposal_chain();
    let report = Resolver::new(Arc::new(policy_tables()))
        .resolve(&mut registry, &id("ProposalByInstrument"))
        .await
        .unwrap();

    assert_eq!(report.visited(), 3);
    assert!(registry.node(&id("ProposalByInstrument")).unwrap().is_resolved());
    let dir = registry.node(&id("ProposalDirectory")).unwrap();
    assert!(!dir.is_resolved());
    assert_eq!(dir.query_results, None);
    assert!(!is_valid(&registry));
}

#[tokio::test]
async fn resolution_survives_wire_roundtrip() {
    let mut registry = proposal_chain();
    Resolver::new(Arc::new(policy_tables()))
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap();

    let decoded = wire::decode(&wire::encode(&registry).unwrap()).unwrap();
    assert_eq!(decoded, registry);
    assert!(is_valid(&decoded));
}

// ============================================================================
// Ambiguity and empty results
// ============================================================================

#[tokio::test]
async fn ambiguous_proposal_is_left_for_the_caller() {
    let client = policy_tables().with_rows(
        "proposals",
        vec![json!({"_id": "5678c", "title": "Second Study", "instrument_id": [54]})],
    );
    let mut registry = proposal_chain();

    let report = Resolver::new(Arc::new(client))
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap();

    let proposal = registry.node(&id("ProposalByInstrument")).unwrap();
    assert_eq!(proposal.value, None);
    assert_eq!(proposal.query_results.as_ref().map(Vec::len), Some(2));
    assert_eq!(report.outcome(&id("ProposalByInstrument")), Some(NodeOutcome::Ambiguous));
    assert_eq!(report.outcome(&id("ProposalDirectory")), Some(NodeOutcome::Blocked));
    assert_eq!(report.lookups, 1);

    assert!(!is_valid(&registry));
    assert_eq!(
        unresolved(&registry),
        vec![
            (id("ProposalByInstrument"), NodeState::Ambiguous(2)),
            (id("ProposalDirectory"), NodeState::Pending),
        ]
    );
}

#[tokio::test]
async fn picking_a_candidate_lets_resolution_continue() {
    let client = Arc::new(policy_tables().with_rows(
        "proposals",
        vec![json!({"_id": "5678c", "title": "Second Study", "instrument_id": [54]})],
    ));
    let resolver = Resolver::new(client);
    let mut registry = proposal_chain();
    resolver.resolve(&mut registry, &id("ProposalDirectory")).await.unwrap();

    // The caller disambiguates by choosing one of the recorded rows
    let choice = {
        let node = registry.node_mut(&id("ProposalByInstrument")).unwrap();
        let row = node.query_results.as_ref().unwrap()[1].clone();
        node.value = row.get("_id").cloned();
        node.value.clone()
    };
    assert_eq!(choice, Some(json!("5678c")));

    resolver.resolve(&mut registry, &id("ProposalDirectory")).await.unwrap();
    assert_eq!(registry.node(&id("ProposalDirectory")).unwrap().value, Some(json!("5678c")));
    assert!(is_valid(&registry));
}

#[tokio::test]
async fn no_match_stays_unresolved_without_error() {
    let mut registry = NodeRegistry::from_records(vec![
        logon().into(),
        instrument().with_value(999).into(),
        proposal().into(),
        directory().into(),
    ])
    .unwrap();

    let report = Resolver::new(Arc::new(policy_tables()))
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap();

    let proposal = registry.node(&id("ProposalByInstrument")).unwrap();
    assert_eq!(proposal.query_results, Some(Vec::new()));
    assert_eq!(proposal.state(), NodeState::NoMatch);
    assert_eq!(report.outcome(&id("ProposalDirectory")), Some(NodeOutcome::Blocked));
    assert!(!is_valid_from(&registry, &id("ProposalDirectory")).unwrap());
}

#[tokio::test]
async fn unseeded_self_reference_blocks_lookup() {
    let client = Arc::new(policy_tables());
    let mut registry = NodeRegistry::from_records(vec![MetaNode::new("logon", "users")
        .depends_on("network_id", "logon")
        .with_value_field("_id")
        .into()])
    .unwrap();

    let report = Resolver::new(client.clone()).resolve(&mut registry, &id("logon")).await.unwrap();
    assert_eq!(report.outcome(&id("logon")), Some(NodeOutcome::Blocked));
    assert_eq!(client.call_count(), 0);
}

// ============================================================================
// Structural errors
// ============================================================================

#[tokio::test]
async fn cycle_fails_before_any_lookup() {
    let client = Arc::new(policy_tables());
    let mut registry = NodeRegistry::from_records(vec![
        logon().into(),
        instrument().into(),
        proposal().depends_on("directory_id", "ProposalDirectory").into(),
        directory().into(),
    ])
    .unwrap();
    let before = registry.clone();

    let err = Resolver::new(client.clone())
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap_err();

    match &err {
        ResolveError::DependencyCycle(members) => {
            let members: HashSet<_> = members.iter().cloned().collect();
            assert_eq!(members, HashSet::from([id("ProposalDirectory"), id("ProposalByInstrument")]));
        }
        other => panic!("expected cycle, got {:?}", other),
    }
    assert!(err.is_structural());
    assert_eq!(client.call_count(), 0);
    assert_eq!(registry, before);
}

#[tokio::test]
async fn unknown_dependency_fails_before_any_lookup() {
    let client = Arc::new(policy_tables());
    let mut registry = NodeRegistry::from_records(vec![proposal().into(), directory().into()]).unwrap();

    let err = Resolver::new(client.clone())
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap_err();

    match err {
        ResolveError::UnknownDependency { missing, referenced_by } => {
            assert_eq!(missing, id("instrumentByID"));
            assert_eq!(referenced_by, id("ProposalByInstrument"));
        }
        other => panic!("expected unknown dependency, got {:?}", other),
    }
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn unknown_start_is_not_found() {
    let mut registry = proposal_chain();
    let err = Resolver::new(Arc::new(policy_tables()))
        .resolve(&mut registry, &id("nothing"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Registry(RegistryError::NotFound(_))));
}

// ============================================================================
// Service failures
// ============================================================================

#[tokio::test]
async fn service_failure_keeps_earlier_progress() {
    let client = policy_tables().with_failure(
        "proposal_directories",
        LookupError::ServiceError { status: 503, body: "maintenance".into() },
    );
    let mut registry = NodeRegistry::from_records(vec![
        logon().into(),
        instrument().into(),
        proposal().into(),
        MetaNode { source_table: Some("proposal_directories".into()), ..directory() }.into(),
    ])
    .unwrap();

    let err = Resolver::new(Arc::new(client))
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap_err();

    match err {
        ResolveError::Lookup { node, source } => {
            assert_eq!(node, id("ProposalDirectory"));
            assert!(matches!(source, LookupError::ServiceError { status: 503, .. }));
        }
        other => panic!("expected lookup error, got {:?}", other),
    }
    assert_eq!(registry.node(&id("ProposalByInstrument")).unwrap().value, Some(json!("1234a")));
    let dir = registry.node(&id("ProposalDirectory")).unwrap();
    assert!(!dir.is_resolved());
    assert_eq!(dir.query_results, None);
}

#[tokio::test]
async fn unavailable_service_aborts_at_first_lookup() {
    let client = Arc::new(MockLookupClient::unavailable());
    let mut registry = proposal_chain();

    let err = Resolver::new(client.clone())
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResolveError::Lookup { ref node, source: LookupError::ServiceUnavailable(_) } if *node == id("ProposalByInstrument")
    ));
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn long_chain_resolves_end_to_end() {
    const LEN: usize = 5_000;
    let mut records = vec![MetaNode::new("n0", "chain").with_value("v").into()];
    for i in 1..LEN {
        records.push(
            MetaNode::new(format!("n{}", i), "chain")
                .depends_on("parent", format!("n{}", i - 1))
                .with_value_field("_id")
                .into(),
        );
    }
    let mut registry = NodeRegistry::from_records(records).unwrap();
    let client = MockLookupClient::new().with_rows("chain", vec![json!({"_id": "v", "parent": "v"})]);
    let last = NodeId::from(format!("n{}", LEN - 1));

    let report = Resolver::new(Arc::new(client)).resolve(&mut registry, &last).await.unwrap();

    assert_eq!(report.visited(), LEN);
    assert_eq!(report.lookups, LEN - 1);
    assert!(is_valid_from(&registry, &last).unwrap());
}

// ============================================================================
// Concurrency and cancellation
// ============================================================================

/// User with three independent lookups hanging off it, joined by a summary node
fn fan_out() -> (NodeRegistry, MockLookupClient) {
    let registry = NodeRegistry::from_records(vec![
        logon().into(),
        MetaNode::new("instrument", "instruments")
            .depends_on("custodian_id", "logon")
            .with_value_field("_id")
            .into(),
        MetaNode::new("institution", "institutions")
            .depends_on("member_id", "logon")
            .with_value_field("_id")
            .into(),
        MetaNode::new("group", "groups")
            .depends_on("member_id", "logon")
            .with_value_field("_id")
            .into(),
        MetaNode::new("summary", "summaries")
            .depends_on("instrument_id", "instrument")
            .depends_on("institution_id", "institution")
            .depends_on("group_id", "group")
            .with_value_field("_id")
            .into(),
    ])
    .unwrap();
    let client = MockLookupClient::new()
        .with_rows("instruments", vec![json!({"_id": 54, "custodian_id": "dmlb2001"})])
        .with_rows("institutions", vec![json!({"_id": 7, "member_id": "dmlb2001"})])
        .with_rows("groups", vec![json!({"_id": "g1", "member_id": ["dmlb2001", "other"]})])
        .with_rows(
            "summaries",
            vec![json!({"_id": "s1", "instrument_id": 54, "institution_id": 7, "group_id": "g1"})],
        );
    (registry, client)
}

#[tokio::test]
async fn independent_branches_resolve_concurrently() {
    let (mut registry, client) = fan_out();
    let client = Arc::new(client);

    let report = Resolver::new(client.clone())
        .with_concurrency(3)
        .resolve(&mut registry, &id("summary"))
        .await
        .unwrap();

    assert_eq!(report.lookups, 4);
    assert_eq!(registry.node(&id("summary")).unwrap().value, Some(json!("s1")));
    assert!(is_valid(&registry));

    // Siblings in any order, the joining node last
    let calls = client.calls();
    assert_eq!(calls.last().unwrap().table, "summaries");
    let first_three: HashSet<_> = calls[..3].iter().map(|c| c.table.clone()).collect();
    assert_eq!(first_three.len(), 3);
}

#[tokio::test]
async fn concurrent_failure_keeps_sibling_results() {
    let (mut registry, client) = fan_out();
    let client = client.with_failure("groups", LookupError::ServiceUnavailable("connection reset".into()));

    let err = Resolver::new(Arc::new(client))
        .with_concurrency(4)
        .resolve(&mut registry, &id("summary"))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::Lookup { ref node, .. } if *node == id("group")));
    assert_eq!(registry.node(&id("instrument")).unwrap().value, Some(json!(54)));
    assert_eq!(registry.node(&id("institution")).unwrap().value, Some(json!(7)));
    assert!(!registry.node(&id("summary")).unwrap().is_resolved());
}

#[tokio::test]
async fn cancelled_before_start_issues_no_lookups() {
    let client = Arc::new(policy_tables());
    let token = CancellationToken::new();
    token.cancel();
    let mut registry = proposal_chain();
    let before = registry.clone();

    let report = Resolver::new(client.clone())
        .with_cancellation(token)
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.lookups, 0);
    assert_eq!(report.visited(), 4);
    assert_eq!(report.with_outcome(NodeOutcome::NotStarted).len(), 2);
    assert_eq!(client.call_count(), 0);
    assert_eq!(registry, before);
}

/// Forwards to a mock and cancels the run after the first lookup
struct CancelAfterFirst {
    inner: MockLookupClient,
    token: CancellationToken,
}

#[async_trait]
impl LookupClient for CancelAfterFirst {
    async fn query(&self, table: &str, fields: &[String], filter: &Filter) -> Result<Vec<Row>, LookupError> {
        let rows = self.inner.query(table, fields, filter).await;
        self.token.cancel();
        rows
    }
}

#[tokio::test]
async fn cancellation_returns_partial_state() {
    let token = CancellationToken::new();
    let client = CancelAfterFirst {
        inner: policy_tables(),
        token: token.clone(),
    };
    let mut registry = proposal_chain();

    let report = Resolver::new(Arc::new(client))
        .with_cancellation(token)
        .resolve(&mut registry, &id("ProposalDirectory"))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.lookups, 1);
    assert_eq!(report.outcome(&id("ProposalByInstrument")), Some(NodeOutcome::Resolved));
    assert_eq!(report.outcome(&id("ProposalDirectory")), Some(NodeOutcome::NotStarted));
    assert!(registry.node(&id("ProposalByInstrument")).unwrap().is_resolved());
    assert!(!registry.node(&id("ProposalDirectory")).unwrap().is_resolved());
}

#[tokio::test]
async fn cancellation_releases_queued_concurrent_lookups() {
    let (mut registry, inner) = fan_out();
    let token = CancellationToken::new();
    let client = CancelAfterFirst {
        inner,
        token: token.clone(),
    };

    let report = Resolver::new(Arc::new(client))
        .with_concurrency(2)
        .with_cancellation(token)
        .resolve(&mut registry, &id("summary"))
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.lookups, 1);
    assert_eq!(report.visited(), 5);
    assert_eq!(report.with_outcome(NodeOutcome::Resolved).len(), 1);
    assert_eq!(report.with_outcome(NodeOutcome::NotStarted).len(), 3);
    assert_eq!(report.outcome(&id("summary")), Some(NodeOutcome::NotStarted));
    assert!(!registry.node(&id("summary")).unwrap().is_resolved());
}
