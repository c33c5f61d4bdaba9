//! Agent Runtime core library.
//!
//! This crate implements the control loop of an autonomous operational agent:
//! it perceives events from the systems it watches, arbitrates between a
//! remote learned advisor and a local rule advisor, applies self-restraint
//! and governance checks, and executes the chosen action through a safe
//! orchestrator — proof-logging every decision point along the way.

pub mod advisor;
pub mod arbitrator;
pub mod config;
pub mod fsm;
pub mod governance;
pub mod logger;
pub mod memory;
pub mod orchestrator;
pub mod perception;
pub mod proof;
pub mod runtime;
pub mod self_restraint;
pub mod state_adapter;
pub mod types;

pub use advisor::{AdvisorDecision, AdvisorTransport, HttpAdvisorTransport, RemoteAdvisorClient};
pub use arbitrator::{Arbitrator, ArbitratedDecision, RuleDecision};
pub use config::Config;
pub use fsm::{AgentFsm, AgentStateSnapshot, TransitionRecord};
pub use governance::{ActionGovernance, Prerequisite};
pub use logger::AgentLogger;
pub use memory::{AgentMemory, MemorySnapshot, MemoryStats, OverrideResult};
pub use orchestrator::{ActionHandler, ActionResult, SafeOrchestrator};
pub use perception::{adapters, PerceptionAdapter, PerceptionLayer};
pub use proof::{events, ProofLog, ProofLogHealth};
pub use runtime::AgentRuntime;
pub use self_restraint::SelfRestraint;
pub use state_adapter::{adapt_state, AdaptedState};
pub use types::*;
