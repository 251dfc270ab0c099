// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use core::borrow::Borrow;

use serde::{Deserialize, Serialize};

use super::mechanism::{Mechanism, MechanismKind};
use crate::types::{PasswordRef, TerminalType};

/// Boolean condition over the active mechanisms gating an operation.
///
/// Evaluation never fails: mechanisms that are required but not present make the condition
/// false, except for [`AccessCondition::Always`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AccessCondition {
    /// Always true
    Always,
    /// True if all children are true, short-circuits in order.  Empty is true.
    And(Vec<AccessCondition>),
    /// True if any child is true, short-circuits in order.  Empty is false.
    Or(Vec<AccessCondition>),
    /// Negation of the child
    Not(Box<AccessCondition>),
    /// True if a mechanism of the kind is active
    ProtocolActive(MechanismKind),
    /// True if the effective authorization of the terminal type has the bit set
    BitAuthorized(TerminalType, u8),
    /// True if the password was used
    PasswordUsed(PasswordRef),
}

impl AccessCondition {
    /// Evaluates the condition against the given mechanisms.
    pub fn check<M: Borrow<Mechanism>>(&self, mechanisms: &[M]) -> bool {
        let mut active = mechanisms.iter().map(<M as Borrow<Mechanism>>::borrow);
        match self {
            Self::Always => true,
            Self::And(children) => children.iter().all(|c| c.check(mechanisms)),
            Self::Or(children) => children.iter().any(|c| c.check(mechanisms)),
            Self::Not(child) => !child.check(mechanisms),
            Self::ProtocolActive(kind) => active.any(|m| m.kind() == *kind),
            Self::BitAuthorized(id, bit) => active.any(|m| match m {
                Mechanism::EffectiveAuthorization {
                    terminal_type,
                    authorization,
                } => terminal_type == id && authorization.has_bit(*bit),
                _ => false,
            }),
            Self::PasswordUsed(reference) => active.any(|m| match m {
                Mechanism::PasswordUsed { password } => password == reference,
                _ => false,
            }),
        }
    }

    /// Returns the kinds of mechanisms needed to evaluate the condition, without duplicates and
    /// in the order they are first referenced.
    pub fn needed_kinds(&self) -> Vec<MechanismKind> {
        let mut kinds = Vec::new();
        self.collect_kinds(&mut kinds);
        kinds
    }

    fn collect_kinds(&self, kinds: &mut Vec<MechanismKind>) {
        let kind = match self {
            Self::Always => return,
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_kinds(kinds);
                }
                return;
            }
            Self::Not(child) => return child.collect_kinds(kinds),
            Self::ProtocolActive(kind) => *kind,
            Self::BitAuthorized(..) => MechanismKind::EffectiveAuthorization,
            Self::PasswordUsed(_) => MechanismKind::PasswordUsed,
        };
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }

    /// Condition that is true if all of the given conditions are true
    pub fn all(conditions: impl IntoIterator<Item = AccessCondition>) -> Self {
        Self::And(conditions.into_iter().collect())
    }

    /// Condition that is true if any of the given conditions is true
    pub fn any(conditions: impl IntoIterator<Item = AccessCondition>) -> Self {
        Self::Or(conditions.into_iter().collect())
    }
}

impl core::ops::Not for AccessCondition {
    type Output = AccessCondition;

    fn not(self) -> AccessCondition {
        AccessCondition::Not(Box::new(self))
    }
}
