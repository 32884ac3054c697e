//! Channel broker
//!
//! Hands out rendezvous channels by number, optionally under a name. Retired
//! numbers are reused oldest first. All state lives behind one lock and the
//! broker is shared by `Arc`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::application::rendezvous::RendezvousChannel;
use crate::domain::ChannelId;
use crate::error::{AppError, Result};

#[derive(Default)]
struct BrokerState {
    running: bool,
    next_id: ChannelId,
    retired: VecDeque<ChannelId>,
    names: HashMap<String, ChannelId>,
    channels: HashMap<ChannelId, Arc<RendezvousChannel>>,
    owners: HashMap<ChannelId, String>,
}

impl BrokerState {
    fn allocate_id(&mut self) -> ChannelId {
        if let Some(id) = self.retired.pop_front() {
            return id;
        }
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct ChannelBroker {
    state: Mutex<BrokerState>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("channel broker lock poisoned".to_string()))
    }

    fn running(&self) -> Result<MutexGuard<'_, BrokerState>> {
        let state = self.lock()?;
        if !state.running {
            return Err(AppError::BrokerStopped);
        }
        Ok(state)
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.lock()?;
        if !state.running {
            state.running = true;
            info!("Channel broker started");
        }
        Ok(())
    }

    /// Stop serving requests and close every live channel
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock()?;
        if !state.running {
            return Ok(());
        }
        for channel in state.channels.values() {
            channel.close();
        }
        let closed = state.channels.len();
        *state = BrokerState::default();
        info!(closed_channels = closed, "Channel broker stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().map(|state| state.running).unwrap_or(false)
    }

    /// Allocate a channel for `owner`, optionally registering it under `name`
    ///
    /// # Errors
    /// - AppError::DuplicateName if `name` is already registered
    /// - AppError::BrokerStopped if the broker is not running
    pub fn acquire(&self, owner: &str, name: Option<&str>) -> Result<ChannelId> {
        let mut state = self.running()?;
        if let Some(name) = name {
            if state.names.contains_key(name) {
                return Err(AppError::DuplicateName(name.to_string()));
            }
        }

        let id = state.allocate_id();
        state
            .channels
            .insert(id, Arc::new(RendezvousChannel::new(id)));
        state.owners.insert(id, owner.to_string());
        if let Some(name) = name {
            state.names.insert(name.to_string(), id);
        }

        debug!(channel = id, owner = %owner, name = ?name, "Channel acquired");
        Ok(id)
    }

    /// # Errors
    /// - AppError::UndefinedName if nothing is registered under `name`
    pub fn find(&self, name: &str) -> Result<ChannelId> {
        let state = self.running()?;
        state
            .names
            .get(name)
            .copied()
            .ok_or_else(|| AppError::UndefinedName(name.to_string()))
    }

    /// Close a channel and return its number to the pool
    ///
    /// Unknown names and numbers are logged and otherwise ignored. A name
    /// registered to a different channel is left in place.
    pub fn retire(&self, id: ChannelId, name: Option<&str>) -> Result<()> {
        let mut state = self.running()?;

        if let Some(name) = name {
            match state.names.get(name).copied() {
                Some(registered) if registered == id => {
                    state.names.remove(name);
                }
                Some(registered) => {
                    warn!(
                        name = %name,
                        channel = id,
                        registered = registered,
                        "Channel name belongs to another channel, keeping it"
                    );
                }
                None => warn!(name = %name, "Retiring unknown channel name"),
            }
        }

        match state.channels.remove(&id) {
            Some(channel) => {
                channel.close();
                state.owners.remove(&id);
                state.names.retain(|_, registered| *registered != id);
                state.retired.push_back(id);
                debug!(channel = id, "Channel retired");
            }
            None => warn!(channel = id, "Retiring unknown channel"),
        }
        Ok(())
    }

    /// Live channel handle
    ///
    /// # Errors
    /// - AppError::UnknownChannel if the number is not allocated
    pub fn channel(&self, id: ChannelId) -> Result<Arc<RendezvousChannel>> {
        let state = self.running()?;
        state
            .channels
            .get(&id)
            .cloned()
            .ok_or(AppError::UnknownChannel(id))
    }

    pub fn owner(&self, id: ChannelId) -> Option<String> {
        self.lock().ok()?.owners.get(&id).cloned()
    }
}
