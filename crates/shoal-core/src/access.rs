//! Peer access list
//!
//! Decides whether messages from a peer are accepted. The list is off by
//! default and every peer is accepted. Once switched on it works in one of
//! two modes:
//!
//! - white list: only peers explicitly accepted get through
//! - black list: every peer gets through unless explicitly refused
//!
//! Decisions are recorded per subject identifier. With a property store the
//! list survives restarts.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::encoding::{decode_key, encode_key};
use crate::error::ShoalError;
use crate::storage::PropertyStore;
use crate::types::PeerIdentity;

/// Property holding the list mode
pub const ACCESS_MODE_PROPERTY: &str = "shoal/access";

const ACCESS_NAMESPACE: &str = "access";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct AccessMode {
    enabled: bool,
    white_list: bool,
}

#[derive(Debug, Default)]
struct AccessState {
    mode: AccessMode,
    decisions: HashMap<String, bool>,
}

/// White or black list of peers
pub struct AccessList {
    store: Option<Arc<dyn PropertyStore>>,
    state: RwLock<AccessState>,
}

impl AccessList {
    /// Access list backed by `store`, loading what was persisted
    pub fn new(store: Option<Arc<dyn PropertyStore>>) -> Result<Self, ShoalError> {
        let mut state = AccessState::default();

        if let Some(store) = &store {
            if let Some(record) = store.get_property(ACCESS_MODE_PROPERTY)? {
                state.mode = postcard::from_bytes(&record)?;
            }
            for name in store.property_names(&encode_key(&[ACCESS_NAMESPACE]))? {
                let parts = decode_key(&name)?;
                if let (Some(si), Some(value)) = (parts.get(1), store.get_property(&name)?) {
                    state.decisions.insert(si.clone(), value.first() == Some(&1));
                }
            }
        }

        Ok(Self {
            store,
            state: RwLock::new(state),
        })
    }

    /// Record whether `peer` is accepted, for every one of its subject identifiers
    pub fn accept_peer(&self, peer: &PeerIdentity, accept: bool) -> Result<(), ShoalError> {
        let mut state = self.state.write();
        for si in identifiers(peer) {
            if let Some(store) = &self.store {
                store.set_property(&decision_property(si), Some(&[u8::from(accept)]))?;
            }
            state.decisions.insert(si.to_string(), accept);
        }
        debug!(peer = %peer, accept, "Access decision recorded");
        Ok(())
    }

    /// Forget every decision recorded for `peer`
    pub fn forget_peer(&self, peer: &PeerIdentity) -> Result<(), ShoalError> {
        let mut state = self.state.write();
        for si in identifiers(peer) {
            if let Some(store) = &self.store {
                store.set_property(&decision_property(si), None)?;
            }
            state.decisions.remove(si);
        }
        Ok(())
    }

    /// Select white list (`true`) or black list (`false`) mode
    pub fn use_white_list(&self, white_list: bool) -> Result<(), ShoalError> {
        self.update_mode(|mode| mode.white_list = white_list)
    }

    /// Switch list checking on or off
    pub fn use_black_white_list(&self, enabled: bool) -> Result<(), ShoalError> {
        self.update_mode(|mode| mode.enabled = enabled)
    }

    /// Whether the list is checked at all
    pub fn is_enabled(&self) -> bool {
        self.state.read().mode.enabled
    }

    /// Whether the list is in white list mode
    pub fn is_white_list(&self) -> bool {
        self.state.read().mode.white_list
    }

    /// Whether messages from `peer` are accepted.
    ///
    /// A refusal recorded for any of the peer's identifiers wins.
    pub fn is_accepted(&self, peer: &PeerIdentity) -> bool {
        let state = self.state.read();
        if !state.mode.enabled {
            return true;
        }

        let decisions: Vec<bool> = identifiers(peer)
            .filter_map(|si| state.decisions.get(si).copied())
            .collect();
        let refused = decisions.contains(&false);
        let accepted = decisions.contains(&true);

        if state.mode.white_list {
            accepted && !refused
        } else {
            !refused
        }
    }

    /// Whether messages that name no sender are accepted.
    ///
    /// Only a white list refuses them.
    pub fn accepts_anonymous(&self) -> bool {
        let mode = self.state.read().mode;
        !(mode.enabled && mode.white_list)
    }

    fn update_mode(&self, change: impl FnOnce(&mut AccessMode)) -> Result<(), ShoalError> {
        let mut state = self.state.write();
        let mut mode = state.mode;
        change(&mut mode);

        if let Some(store) = &self.store {
            store.set_property(ACCESS_MODE_PROPERTY, Some(&postcard::to_allocvec(&mode)?))?;
        }
        state.mode = mode;
        info!(enabled = mode.enabled, white_list = mode.white_list, "Access list mode changed");
        Ok(())
    }
}

impl std::fmt::Debug for AccessList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("AccessList")
            .field("mode", &state.mode)
            .field("decisions", &state.decisions.len())
            .finish_non_exhaustive()
    }
}

/// Subject identifiers of a peer; the name stands in for a peer without any
fn identifiers(peer: &PeerIdentity) -> impl Iterator<Item = &str> {
    let fallback = peer.sis.is_empty().then_some(peer.name.as_str());
    peer.sis.iter().map(String::as_str).chain(fallback)
}

fn decision_property(si: &str) -> String {
    encode_key(&[ACCESS_NAMESPACE, si])
}
