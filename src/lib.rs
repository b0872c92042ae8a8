//! tunnel-guard: supervise a tunnel client inside a network namespace and
//! keep egress fail-closed until the tunnel is verified.
//!
//! # Security Model
//!
//! The killswitch is **deny-by-default**: once installed, traffic may only
//! leave through the tunnel interface, to the container network, to
//! operator-allowed subnets, or to the tunnel server endpoints.
//!
//! # Architecture
//!
//! - **Supervisor**: spawns the client, maps signals to graceful shutdown
//! - **Netstate**: link/route snapshots and the readiness monitor
//! - **Firewall**: rule model, idempotent rule store and the controller
//! - **Health**: ordered pass/fail probe for container health checks
//! - **Config**: CLI, environment and TOML merged into immutable settings
//! - **Telemetry**: structured syslog audit trail

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod firewall;
pub mod health;
pub mod netstate;
pub mod orchestrator;
pub mod retry;
pub mod supervisor;
pub mod telemetry;
