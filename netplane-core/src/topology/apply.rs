use super::visitor::NetworkTopologyVisitor;
use crate::agent::{AgentManager, BatchAnswer, CommandBatch, CommandResult};
use crate::error::{ErrorCategory, NetplaneError, NetplaneResult};
use crate::rules::{RuleCategory, RuleSet};
use crate::types::{HostId, Network, NetworkId, RouterId, VirtualRouter, VmState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Aggregate result of applying one bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyStatus {
    /// Every targeted router acknowledged every command
    Applied,
    /// Some commands were acknowledged, others rejected, undelivered or skipped
    Partial,
    /// No command was acknowledged
    NotApplied,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterApplyResult {
    pub router_id: RouterId,
    pub answer: BatchAnswer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleApplyReport {
    pub network_id: NetworkId,
    pub rule_type: String,
    pub category: RuleCategory,
    pub status: ApplyStatus,
    pub routers: Vec<RouterApplyResult>,
    /// Stopped routers; they receive the rules when they start
    pub skipped: Vec<RouterId>,
    /// Routers that could not be reached and were left out
    pub disconnected: Vec<RouterId>,
}

impl RuleApplyReport {
    pub fn is_applied(&self) -> bool {
        self.status == ApplyStatus::Applied
    }

    /// Commands per router that never got an answer
    pub fn undelivered_commands(&self) -> Vec<(RouterId, CommandResult)> {
        self.routers
            .iter()
            .flat_map(|r| r.answer.undelivered().map(move |c| (r.router_id, c.clone())))
            .collect()
    }

    /// `ResourceUnavailable` when some router could not be reached mid-apply
    pub fn error_category(&self) -> Option<ErrorCategory> {
        self.routers
            .iter()
            .flat_map(|r| r.answer.undelivered())
            .find_map(|c| c.error)
    }

    /// Rejected and undelivered commands per router
    pub fn failed_commands(&self) -> Vec<(RouterId, CommandResult)> {
        self.routers
            .iter()
            .flat_map(|r| r.answer.failed().map(move |c| (r.router_id, c.clone())))
            .collect()
    }
}

enum Disposition {
    Target(HostId),
    Skip,
    Disconnected,
}

fn classify(router: &VirtualRouter, agents: &AgentManager) -> Disposition {
    match router.state {
        VmState::Running => match router.host_id {
            Some(host) if agents.is_connected(host) => Disposition::Target(host),
            _ => Disposition::Disconnected,
        },
        VmState::Stopped | VmState::Stopping | VmState::Destroyed | VmState::Expunging => {
            Disposition::Skip
        }
        VmState::Starting | VmState::Migrating | VmState::Error => Disposition::Disconnected,
    }
}

fn summarize(results: &[RouterApplyResult]) -> ApplyStatus {
    if results.iter().all(|r| r.answer.all_succeeded()) {
        return ApplyStatus::Applied;
    }
    if results.iter().all(|r| r.answer.succeeded_count() == 0) {
        return ApplyStatus::NotApplied;
    }
    ApplyStatus::Partial
}

/// Send `rules` to every running, connected router of `network`.
///
/// Batches are built for all targets before anything is sent, so an
/// unsupported category fails without side effects. Any non-running router
/// other than a stopped one is fatal when `fail_when_disconnected` is set and
/// left out otherwise; with no reachable router at all the call fails. A
/// router that stops answering mid-batch is recorded in the report instead.
pub(crate) async fn apply_to_routers(
    visitor: &dyn NetworkTopologyVisitor,
    agents: &AgentManager,
    network: &Network,
    routers: &[VirtualRouter],
    rule_type: &str,
    fail_when_disconnected: bool,
    rules: &RuleSet,
) -> NetplaneResult<RuleApplyReport> {
    if rules.network().id != network.id {
        return Err(NetplaneError::validation(
            "rules.network",
            format!("bundle targets {} but was applied to {}", rules.network().id, network.id),
        ));
    }
    if routers.is_empty() {
        return Err(NetplaneError::unavailable(
            "router",
            format!("unable to apply {} on {}: no virtual router", rule_type, network.id),
        ));
    }

    let mut targets: Vec<(&VirtualRouter, HostId, CommandBatch)> = Vec::new();
    let mut skipped = Vec::new();
    let mut disconnected = Vec::new();

    for router in routers {
        match classify(router, agents) {
            Disposition::Target(host) => {
                let batch = visitor.visit(router, rules)?;
                targets.push((router, host, batch));
            }
            Disposition::Skip => {
                debug!(router = %router.id, state = ?router.state, rule_type, "Router not running, rules applied on start");
                skipped.push(router.id);
            }
            Disposition::Disconnected => {
                if fail_when_disconnected {
                    return Err(NetplaneError::unavailable(
                        "router",
                        format!(
                            "unable to apply {} on {}: {} is {:?} and not reachable",
                            rule_type, network.id, router.id, router.state
                        ),
                    ));
                }
                warn!(router = %router.id, state = ?router.state, rule_type, "Router disconnected, skipping rule application");
                disconnected.push(router.id);
            }
        }
    }

    if targets.is_empty() && !disconnected.is_empty() {
        return Err(NetplaneError::unavailable(
            "router",
            format!(
                "unable to apply {} on {}: no connected virtual router",
                rule_type, network.id
            ),
        ));
    }

    let mut results = Vec::with_capacity(targets.len());
    for (router, host, batch) in targets {
        let answer = agents.send_batch(host, &batch).await;
        if !answer.all_succeeded() {
            warn!(
                router = %router.id,
                rule_type,
                failed = answer.failed().count(),
                undelivered = answer.undelivered().count(),
                skipped = answer.skipped.len(),
                "Router did not apply every command"
            );
        }
        results.push(RouterApplyResult {
            router_id: router.id,
            answer,
        });
    }

    let status = summarize(&results);
    info!(
        network = %network.id,
        rule_type,
        status = ?status,
        routers = results.len(),
        skipped = skipped.len(),
        disconnected = disconnected.len(),
        "Applied rules"
    );

    Ok(RuleApplyReport {
        network_id: network.id,
        rule_type: rule_type.to_string(),
        category: rules.category(),
        status,
        routers: results,
        skipped,
        disconnected,
    })
}
