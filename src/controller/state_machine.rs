//! Finite state machine for a single policy within one reconciliation pass
//!
//! Every policy starts `Pending` or `Resolved` depending on the ledger.
//! Applying a pending policy moves it through `Applying` to `Resolved`; a
//! failure while applying drops it back to `Pending` so the next run picks
//! it up again. `Resolved` is terminal: the reconciler never clears a
//! ledger entry.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::resources::PolicyName;

/// Lifecycle phase of one policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyPhase {
    /// No ledger entry yet
    Pending,
    /// Objects are being deployed or retired
    Applying,
    /// Ledger entry present
    Resolved,
}

impl fmt::Display for PolicyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyPhase::Pending => write!(f, "Pending"),
            PolicyPhase::Applying => write!(f, "Applying"),
            PolicyPhase::Resolved => write!(f, "Resolved"),
        }
    }
}

/// Events that trigger phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyEvent {
    /// The driver started working on the policy's objects
    ApplyStarted,
    /// Every object was handled and the ledger entry written
    ObjectsApplied,
    /// Deploying an object or writing the ledger failed
    ApplyFailed,
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::ApplyStarted => write!(f, "ApplyStarted"),
            PolicyEvent::ObjectsApplied => write!(f, "ObjectsApplied"),
            PolicyEvent::ApplyFailed => write!(f, "ApplyFailed"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: PolicyPhase,
    pub to: PolicyPhase,
    pub event: PolicyEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: PolicyPhase,
        to: PolicyPhase,
        event: PolicyEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

static TRANSITIONS: [Transition; 3] = [
    Transition::new(
        PolicyPhase::Pending,
        PolicyPhase::Applying,
        PolicyEvent::ApplyStarted,
        "Deploying policy objects",
    ),
    Transition::new(
        PolicyPhase::Applying,
        PolicyPhase::Resolved,
        PolicyEvent::ObjectsApplied,
        "Policy objects applied and recorded",
    ),
    Transition::new(
        PolicyPhase::Applying,
        PolicyPhase::Pending,
        PolicyEvent::ApplyFailed,
        "Applying failed, left for the next run",
    ),
];

/// Look up the transition for `event` in `current`, if any
pub fn transition(current: PolicyPhase, event: PolicyEvent) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == current && t.event == event)
}

/// All events valid in a phase
pub fn valid_events(phase: PolicyPhase) -> Vec<PolicyEvent> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == phase)
        .map(|t| t.event)
        .collect()
}

/// Phase of every catalog policy during one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStates {
    phases: BTreeMap<PolicyName, PolicyPhase>,
}

impl PolicyStates {
    /// Infer initial phases from ledger entries: a present key is
    /// `Resolved`, anything else `Pending`.
    ///
    /// Presence is what counts, matching how earlier runs have always been
    /// read; the value written is always `resolved`.
    pub fn from_ledger(entries: &BTreeMap<String, String>) -> Self {
        let phases = PolicyName::ALL
            .into_iter()
            .map(|policy| {
                let phase = if entries.contains_key(&policy.annotation_key()) {
                    PolicyPhase::Resolved
                } else {
                    PolicyPhase::Pending
                };
                (policy, phase)
            })
            .collect();
        Self { phases }
    }

    pub fn phase(&self, policy: PolicyName) -> PolicyPhase {
        self.phases
            .get(&policy)
            .copied()
            .unwrap_or(PolicyPhase::Pending)
    }

    pub fn is_resolved(&self, policy: PolicyName) -> bool {
        self.phase(policy) == PolicyPhase::Resolved
    }

    pub fn all_resolved(&self) -> bool {
        PolicyName::ALL.into_iter().all(|p| self.is_resolved(p))
    }

    /// Apply `event` to `policy`, returning the new phase.
    pub fn apply(&mut self, policy: PolicyName, event: PolicyEvent) -> Result<PolicyPhase> {
        let current = self.phase(policy);
        let t = transition(current, event).ok_or(Error::InvalidTransition {
            policy,
            phase: current,
            event,
        })?;
        debug!(
            policy = %policy,
            from = %t.from,
            to = %t.to,
            event = %event,
            "{}",
            t.description
        );
        self.phases.insert(policy, t.to);
        Ok(t.to)
    }
}
