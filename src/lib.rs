//! Faultline resilience-validation harness.
//!
//! This library provides the building blocks for controlled fault injection
//! against a Kubernetes application stack: injectors for the database
//! primary, cache primary, application replicas, nodes and network paths,
//! a recovery-time prober, data-integrity probes, the scenario orchestrator
//! that sequences them, and a load generator that exercises the autoscaler.

pub mod cluster;
pub mod config;
pub mod error;
pub mod fault;
pub mod integrity;
pub mod loadtest;
pub mod probe;
pub mod report;
pub mod retry;
pub mod scenario;
