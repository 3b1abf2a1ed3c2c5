//! Behavioural suites for the orchestrator.

mod admin_behaviour;
mod support;
