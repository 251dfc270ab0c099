// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::BTreeMap;

use serde::Deserialize;

pub mod reply;

use iso7816::Status;

use crate::apdu::{self, CommandApdu, CommandExt, ResponseApdu};
use crate::security::{
    AccessCondition, Mechanism, MechanismKind, SecurityContext, SecurityContextStore,
    SecurityEvent,
};
use crate::sm::{ChannelSnapshot, ChannelState, SecureChannelCodec};
use crate::types::LifeCycle;
use crate::utils::Hex;
use reply::Reply;

/// Card application processing plaintext commands.
///
/// The application implements the file system and the security protocols of the card.  It
/// reports the outcome of security protocols as [`Update`]s.
pub trait Application {
    /// Processes a plaintext command and writes the response data to `ctx.reply`
    fn process(&mut self, ctx: Context<'_>) -> Result<(), Status>;

    /// Called on power-on and reset
    fn reset(&mut self) {}
}

/// Simulated eID card.
///
/// This is the main entry point for this crate.  It owns the security state and the secure
/// channel of one card session and forwards plaintext commands to the [`Application`].
#[derive(Debug)]
pub struct Card<A: Application> {
    app: A,
    options: Options,
    store: SecurityContextStore,
    codec: SecureChannelCodec,
    sessions: BTreeMap<u8, SessionContext>,
}

/// A stored session: the mechanisms surviving [`SecurityEvent::StoreSession`] and the serialized
/// channel
#[derive(Debug)]
struct SessionContext {
    mechanisms: Vec<(SecurityContext, Mechanism)>,
    channel: Option<Vec<u8>>,
}

/// Channel changes performed after the response has been protected
#[derive(Debug, Default)]
struct ChannelAction {
    teardown: bool,
    install: Option<ChannelState>,
}

impl<A: Application> Card<A> {
    /// Creates a new card with the given application and options.
    pub fn new(app: A, options: Options) -> Self {
        Self {
            app,
            options,
            store: SecurityContextStore::new(),
            codec: SecureChannelCodec::new(),
            sessions: BTreeMap::new(),
        }
    }

    /// The security state of the card
    pub fn store(&self) -> &SecurityContextStore {
        &self.store
    }

    /// The secure messaging state of the card
    pub fn codec(&self) -> &SecureChannelCodec {
        &self.codec
    }

    /// The card application
    pub fn app(&self) -> &A {
        &self.app
    }

    /// The card application
    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// The options of the card
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns `true` if a session context is stored under `id`
    pub fn has_session(&self, id: u8) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Handles a serialized command APDU and returns the serialized response APDU.
    pub fn handle_bytes(&mut self, apdu: &[u8]) -> Vec<u8> {
        match apdu::parse(apdu) {
            Ok(command) => self.handle(&command).to_bytes(),
            Err(status) => {
                warn!("Failed to parse command {:02X?}: {status:?}", apdu);
                ResponseApdu::from(status).to_bytes()
            }
        }
    }

    /// Handles one command APDU.
    ///
    /// The command must be complete, i. e. chained commands must be resolved by the caller.
    pub fn handle(&mut self, command: &CommandApdu) -> ResponseApdu {
        if self.options.log_apdus {
            trace!("Received APDU {}", Hex(&command.to_bytes()));
        }

        let had_channel = self.codec.is_active();
        let decoded = match self.codec.decode(command) {
            Ok(decoded) => decoded,
            Err(err) => {
                if had_channel {
                    self.store.apply_event(SecurityEvent::ChannelEnded);
                }
                return err.status().into();
            }
        };
        if let Some(event) = decoded.event {
            self.store.apply_event(event);
        }
        if decoded.secured && self.options.log_apdus {
            trace!("Unwrapped APDU {}", Hex(&decoded.command.to_bytes()));
        }

        let mut data = Vec::new();
        let mut updates = Updates::default();
        let context = Context {
            command: &decoded.command,
            secured: decoded.secured,
            security: &self.store,
            channel: self.codec.channel(),
            options: &self.options,
            updates: &mut updates,
            reply: Reply(&mut data),
        };
        let instruction = u8::from(decoded.command.instruction());
        let mut response = match self.app.process(context) {
            Ok(()) => ResponseApdu::new(data, Status::Success),
            Err(status) => {
                info!("Command {instruction:02X} failed: {status:?}");
                status.into()
            }
        };
        let action = self.apply_updates(updates);

        if decoded.secured {
            if self.options.log_apdus {
                trace!("Plaintext response {}", Hex(&response.to_bytes()));
            }
            response = match self.codec.encode(&response, instruction) {
                Ok(response) => response,
                Err(err) => {
                    self.store.apply_event(SecurityEvent::ChannelEnded);
                    err.status().into()
                }
            };
        }

        if action.teardown {
            self.codec.teardown();
        }
        if let Some(state) = action.install {
            self.codec.install(state);
        }

        if self.options.log_apdus {
            trace!("Sending response {}", Hex(&response.to_bytes()));
        }
        response
    }

    /// Applies the updates of one exchange: first all events, then all mechanism updates.
    fn apply_updates(&mut self, updates: Updates) -> ChannelAction {
        let mut action = ChannelAction::default();
        let mut restored = Vec::new();

        for update in updates.iter() {
            match update {
                Update::Event(event) => {
                    self.store.apply_event(*event);
                    if *event == SecurityEvent::ChannelEnded {
                        action.teardown = true;
                    }
                }
                Update::StoreSession(id) => {
                    self.store_session(*id);
                    self.store.apply_event(SecurityEvent::StoreSession);
                }
                Update::RestoreSession(id) => match self.sessions.remove(id) {
                    Some(session) => {
                        self.store.apply_event(SecurityEvent::RestoreSession);
                        restored.push(session);
                    }
                    None => warn!("No stored session context {id}"),
                },
                Update::Mechanism(..) | Update::Channel(_) => {}
            }
        }

        let mut restored = restored.into_iter();
        for update in updates.into_iter() {
            match update {
                Update::Mechanism(context, mechanism) => {
                    self.store.apply_mechanism_update(context, mechanism)
                }
                Update::Channel(state) => {
                    self.store.apply_mechanism_update(
                        SecurityContext::Global,
                        Mechanism::SecureMessaging {
                            cipher: state.cipher(),
                        },
                    );
                    action.install = Some(state);
                }
                Update::RestoreSession(_) => {
                    let Some(session) = restored.next() else {
                        continue;
                    };
                    action.teardown = true;
                    action.install = session.channel.and_then(|bytes| {
                        ChannelSnapshot::from_bytes(&bytes)
                            .and_then(|snapshot| snapshot.restore())
                            .map_err(|_err| error!("Failed to restore channel: {_err}"))
                            .ok()
                    });
                    // Secure messaging is only active again if the channel came back
                    let has_channel = action.install.is_some();
                    for (context, mechanism) in session.mechanisms {
                        if has_channel || mechanism.kind() != MechanismKind::SecureMessaging {
                            self.store.apply_mechanism_update(context, mechanism);
                        }
                    }
                }
                Update::Event(_) | Update::StoreSession(_) => {}
            }
        }
        action
    }

    fn store_session(&mut self, id: u8) {
        if !self.sessions.contains_key(&id) && self.sessions.len() >= self.options.max_stored_sessions
        {
            warn!("Too many stored session contexts, not storing {id}");
            return;
        }
        let channel = match self.codec.snapshot().and_then(|s| s.to_bytes()) {
            Ok(bytes) => Some(bytes),
            Err(_err) => {
                debug!("Storing session context {id} without channel: {_err}");
                None
            }
        };
        let mechanisms = self
            .store
            .iter()
            .filter(|(_, m)| !m.deletion_required(SecurityEvent::StoreSession))
            .map(|(context, m)| (context, m.clone()))
            .collect();
        debug!("Storing session context {id}");
        self.sessions.insert(
            id,
            SessionContext {
                mechanisms,
                channel,
            },
        );
    }

    /// Resets the card to the power-on state.
    pub fn reset(&mut self) {
        debug!("Resetting card");
        self.store.reset_all();
        self.codec.teardown();
        self.sessions.clear();
        self.app.reset();
    }
}

/// Changes of the security state requested by the [`Application`]
#[derive(Clone, Debug)]
pub enum Update {
    /// Register a mechanism, replacing the mechanism of the same kind
    Mechanism(SecurityContext, Mechanism),
    /// Delete the mechanisms invalidated by the event.  [`SecurityEvent::ChannelEnded`] also
    /// tears the secure channel down after the response.
    Event(SecurityEvent),
    /// Establish (or rekey) the secure channel after the response
    Channel(ChannelState),
    /// Store the session context under the given id
    StoreSession(u8),
    /// Restore the session context stored under the given id
    RestoreSession(u8),
}

/// Updates collected during one exchange
#[derive(Clone, Debug, Default)]
pub struct Updates(Vec<Update>);

impl Updates {
    /// Adds an update
    pub fn push(&mut self, update: Update) {
        self.0.push(update);
    }

    /// Registers a mechanism
    pub fn mechanism(&mut self, context: SecurityContext, mechanism: Mechanism) {
        self.push(Update::Mechanism(context, mechanism));
    }

    /// Reports an event
    pub fn event(&mut self, event: SecurityEvent) {
        self.push(Update::Event(event));
    }

    /// Establishes a channel after the response
    pub fn channel(&mut self, state: ChannelState) {
        self.push(Update::Channel(state));
    }

    /// Iterates over the updates in the order they were added
    pub fn iter(&self) -> impl Iterator<Item = &Update> {
        self.0.iter()
    }
}

impl IntoIterator for Updates {
    type Item = Update;
    type IntoIter = std::vec::IntoIter<Update>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Options for the card.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Options {
    /// Log command and response APDUs (plaintext and protected) at trace level
    pub log_apdus: bool,
    /// Maximum number of stored session contexts
    pub max_stored_sessions: usize,
    /// Context used by [`Context::check_access`]
    pub access_context: SecurityContext,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_apdus: false,
            max_stored_sessions: 4,
            access_context: SecurityContext::Application,
        }
    }
}

/// Command context handed to the [`Application`]
#[derive(Debug)]
pub struct Context<'a> {
    /// The plaintext command
    pub command: &'a CommandApdu,
    /// `true` if the command was received with secure messaging
    pub secured: bool,
    /// The security state before this exchange
    pub security: &'a SecurityContextStore,
    /// The established secure channel, e.g. as predecessor for rekeying
    pub channel: Option<&'a ChannelState>,
    /// The options of the card
    pub options: &'a Options,
    /// Updates of the security state, applied after processing
    pub updates: &'a mut Updates,
    /// The response data
    pub reply: Reply<'a>,
}

impl<'a> Context<'a> {
    /// The command data
    pub fn data(&self) -> &[u8] {
        self.command.data().as_slice()
    }

    /// Checks an access condition against the configured context of the security state
    pub fn check_access(&self, lifecycle: LifeCycle, condition: &AccessCondition) -> bool {
        self.security
            .check_access_in(lifecycle, condition, self.options.access_context)
    }

    /// Lend the context
    ///
    /// The resulting `Context` has a shorter lifetime than the original one, meaning that it
    /// can be passed by value to other functions and the original context can then be used again
    pub fn lend(&mut self) -> Context<'_> {
        Context {
            command: self.command,
            secured: self.secured,
            security: self.security,
            channel: self.channel,
            options: self.options,
            updates: self.updates,
            reply: self.reply.lend(),
        }
    }
}
