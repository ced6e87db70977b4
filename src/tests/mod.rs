//! End-to-end scenario tests: engine-level protocol flows and full-node
//! flows over the in-process transport.

mod engine_flows;
mod harness;
mod node_flows;
