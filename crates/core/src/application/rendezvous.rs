//! Rendezvous channel
//!
//! One start broadcast read by many workers without consuming it, and one
//! completion queue read only by the executor. Closing the channel wakes every
//! waiter with `ChannelError::Closed`.

use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use crate::domain::{ChannelError, ChannelId, ChannelMessage, ProcessId};

#[derive(Debug, Clone, Copy, PartialEq)]
enum StartState {
    Pending,
    Start(f64),
    Closed,
}

pub struct RendezvousChannel {
    id: ChannelId,
    start: watch::Sender<StartState>,
    done_tx: mpsc::UnboundedSender<ProcessId>,
    done_rx: Mutex<mpsc::UnboundedReceiver<ProcessId>>,
}

impl RendezvousChannel {
    pub fn new(id: ChannelId) -> Self {
        let (start, _) = watch::channel(StartState::Pending);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            id,
            start,
            done_tx,
            done_rx: Mutex::new(done_rx),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        *self.start.borrow() == StartState::Closed
    }

    /// Current broadcast end time, if one was sent
    pub fn peek_start(&self) -> Option<f64> {
        match *self.start.borrow() {
            StartState::Start(end_time) => Some(end_time),
            _ => None,
        }
    }

    /// Write a message: `start` goes to the broadcast, `done` to the queue
    pub fn send(&self, message: ChannelMessage) -> Result<(), ChannelError> {
        match message {
            ChannelMessage::Start { end_time } => self.broadcast_start(end_time),
            ChannelMessage::Done { owner_id } => self.signal_done(owner_id),
        }
    }

    pub fn broadcast_start(&self, end_time: f64) -> Result<(), ChannelError> {
        let mut closed = false;
        self.start.send_if_modified(|state| {
            if *state == StartState::Closed {
                closed = true;
                return false;
            }
            *state = StartState::Start(end_time);
            true
        });
        if closed {
            return Err(ChannelError::Closed);
        }
        debug!(channel = self.id, end_time = %end_time, "Start broadcast");
        Ok(())
    }

    pub fn signal_done(&self, owner_id: ProcessId) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.done_tx
            .send(owner_id)
            .map_err(|_| ChannelError::Closed)
    }

    /// Block until the start broadcast arrives; returns its end time
    pub async fn await_start(&self) -> Result<f64, ChannelError> {
        let mut rx = self.start.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                StartState::Start(end_time) => return Ok(end_time),
                StartState::Closed => return Err(ChannelError::Closed),
                StartState::Pending => {}
            }
            rx.changed().await.map_err(|_| ChannelError::Closed)?;
        }
    }

    /// Next completion, waiting at most `timeout`
    pub async fn recv_done(&self, timeout: Duration) -> Result<ProcessId, ChannelError> {
        let mut queue = self.done_rx.lock().await;
        let mut state = self.start.subscribe();

        let wait = async {
            loop {
                if let Ok(owner_id) = queue.try_recv() {
                    return Ok(owner_id);
                }
                if *state.borrow_and_update() == StartState::Closed {
                    return Err(ChannelError::Closed);
                }
                tokio::select! {
                    biased;
                    received = queue.recv() => return received.ok_or(ChannelError::Closed),
                    changed = state.changed() => {
                        if changed.is_err() {
                            return Err(ChannelError::Closed);
                        }
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ChannelError::Timeout(timeout.as_millis() as u64))?
    }

    /// Close the channel and wake every waiter
    pub fn close(&self) {
        self.start.send_replace(StartState::Closed);
        debug!(channel = self.id, "Channel closed");
    }

    /// Clear the broadcast and drop queued completions before the next run
    ///
    /// A closed channel stays closed.
    pub async fn reset(&self) {
        let mut queue = self.done_rx.lock().await;
        while queue.try_recv().is_ok() {}
        self.start.send_if_modified(|state| {
            if *state == StartState::Closed {
                return false;
            }
            *state = StartState::Pending;
            true
        });
    }
}
