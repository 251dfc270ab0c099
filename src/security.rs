// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! Security state of the card: active mechanisms per context and access conditions

mod condition;
mod mechanism;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{iterable_enum, LifeCycle};

pub use condition::AccessCondition;
pub use mechanism::{
    Mechanism, MechanismKind, SecurityEvent, MAX_CHR_LEN, MAX_EPHEMERAL_KEY_LEN,
};

iterable_enum! {
    /// Scope partition of the security state
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
    pub enum SecurityContext {
        /// Valid for the whole card
        Global,
        /// Valid for the selected application
        #[default]
        Application,
        /// Valid for the selected file
        File,
        /// Valid for the current command
        Command,
    }
}

/// Registry of the active mechanisms, at most one per kind and context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecurityContextStore {
    contexts: BTreeMap<SecurityContext, BTreeMap<MechanismKind, Mechanism>>,
}

impl SecurityContextStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mechanisms of the given kinds active in the context.
    pub fn query(&self, context: SecurityContext, kinds: &[MechanismKind]) -> Vec<&Mechanism> {
        let Some(mechanisms) = self.contexts.get(&context) else {
            return Vec::new();
        };
        kinds
            .iter()
            .filter_map(|kind| mechanisms.get(kind))
            .collect()
    }

    /// Returns the mechanism of the given kind active in the context
    pub fn get(&self, context: SecurityContext, kind: MechanismKind) -> Option<&Mechanism> {
        self.contexts.get(&context)?.get(&kind)
    }

    /// Returns `true` if a mechanism of the given kind is active in the context
    pub fn contains(&self, context: SecurityContext, kind: MechanismKind) -> bool {
        self.get(context, kind).is_some()
    }

    /// Registers a mechanism, replacing the mechanism of the same kind in the context
    pub fn apply_mechanism_update(&mut self, context: SecurityContext, mechanism: Mechanism) {
        debug!("Registering {:?} in {context:?}", mechanism.kind());
        self.contexts
            .entry(context)
            .or_default()
            .insert(mechanism.kind(), mechanism);
    }

    /// Deletes all mechanisms that must be deleted on `event`.  Returns the number of deleted
    /// mechanisms.
    pub fn apply_event(&mut self, event: SecurityEvent) -> usize {
        let before = self.len();
        for mechanisms in self.contexts.values_mut() {
            mechanisms.retain(|_, m| !m.deletion_required(event));
        }
        self.contexts.retain(|_, mechanisms| !mechanisms.is_empty());
        let deleted = before - self.len();
        debug!("Applied {event:?}, deleted {deleted} mechanism(s)");
        deleted
    }

    /// Deletes all mechanisms
    pub fn reset_all(&mut self) {
        self.contexts.clear();
    }

    /// Checks the access condition against the mechanisms of the application context.
    ///
    /// See [`check_access_in`](Self::check_access_in).
    pub fn check_access(&self, lifecycle: LifeCycle, condition: &AccessCondition) -> bool {
        self.check_access_in(lifecycle, condition, SecurityContext::Application)
    }

    /// Checks the access condition against the mechanisms of the given context.
    ///
    /// Access is granted without evaluating the condition if the life cycle state of the object
    /// does not enforce access conditions.
    pub fn check_access_in(
        &self,
        lifecycle: LifeCycle,
        condition: &AccessCondition,
        context: SecurityContext,
    ) -> bool {
        if lifecycle.grants_access() {
            return true;
        }
        condition.check(&self.query(context, &condition.needed_kinds()))
    }

    /// Number of active mechanisms over all contexts
    pub fn len(&self) -> usize {
        self.contexts.values().map(BTreeMap::len).sum()
    }

    /// Returns `true` if no mechanism is active
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all active mechanisms with their context
    pub fn iter(&self) -> impl Iterator<Item = (SecurityContext, &Mechanism)> {
        self.contexts
            .iter()
            .flat_map(|(context, mechanisms)| mechanisms.values().map(move |m| (*context, m)))
    }
}
