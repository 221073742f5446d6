//! Shared fixtures for resolution tests
//!
//! The proposal chain mirrors what the uploader UI sends: a logged-on user,
//! a selected instrument, the proposal for that instrument, and the upload
//! directory named after the proposal.

#![allow(dead_code)]

use serde_json::json;
use uploadmeta::{MetaNode, MockLookupClient, NodeRegistry};

pub fn logon() -> MetaNode {
    MetaNode::new("logon", "users")
        .with_destination("Transactions.submitter")
        .with_display("logged_on", "Currently Logged On", "%(first_name)s %(last_name)s")
        .depends_on("network_id", "logon")
        .with_query_fields(["first_name", "last_name", "_id"])
        .with_value_field("_id")
        .with_value("dmlb2001")
}

pub fn instrument() -> MetaNode {
    MetaNode::new("instrumentByID", "instruments")
        .with_destination("Transactions.instrument")
        .with_display("select", "Instrument", "%(_id)s %(name_short)s - %(display_name)s")
        .depends_on("_id", "instrumentByID")
        .depends_on("user_id", "logon")
        .with_query_fields(["display_name", "name_short", "_id"])
        .with_value_field("_id")
        .with_value(54)
}

pub fn proposal() -> MetaNode {
    MetaNode::new("ProposalByInstrument", "proposals")
        .with_destination("Transactions.proposal")
        .with_display("select", "Proposal", "%(_id)s %(title)s")
        .depends_on("instrument_id", "instrumentByID")
        .with_query_fields(["title", "_id"])
        .with_value_field("_id")
}

pub fn directory() -> MetaNode {
    MetaNode::new("ProposalDirectory", "proposals")
        .with_display("directoryTree", "", "Proposal %(_id)s")
        .with_directory_order(0)
        .depends_on("_id", "ProposalByInstrument")
        .with_query_fields(["_id"])
        .with_value_field("_id")
}

/// The four-node chain in registry order
pub fn proposal_chain() -> NodeRegistry {
    NodeRegistry::from_records(vec![
        logon().into(),
        instrument().into(),
        proposal().into(),
        directory().into(),
    ])
    .expect("unique ids")
}

/// Policy service tables with exactly one proposal on instrument 54
pub fn policy_tables() -> MockLookupClient {
    MockLookupClient::new()
        .with_rows(
            "users",
            vec![json!({"_id": 10, "network_id": "dmlb2001", "first_name": "David", "last_name": "Brown"})],
        )
        .with_rows(
            "instruments",
            vec![json!({"_id": 54, "name_short": "NMR", "display_name": "NMR PROBES: Nittany Liquid Probes"})],
        )
        .with_rows(
            "proposals",
            vec![
                json!({"_id": "1234a", "title": "Pacifica Development", "instrument_id": [54]}),
                json!({"_id": "1234b", "title": "Other Work", "instrument_id": [104]}),
            ],
        )
}
