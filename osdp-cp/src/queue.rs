//! Per-device command queue
//!
//! One bounded FIFO per configured device. A command stays at the front of
//! its queue while its exchange is in flight and is removed only once the
//! device acknowledges it, so a retransmit resends the same command.

use osdp_core::OsdpCommand;
use std::collections::VecDeque;

/// Result of enqueueing a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Accepted with room to spare
    Queued,
    /// Accepted, but the oldest pending command was dropped to make room
    QueuedDroppedOldest(OsdpCommand),
}

/// Bounded FIFO of commands awaiting dispatch to one device
#[derive(Debug)]
pub struct CommandQueue {
    commands: VecDeque<OsdpCommand>,
    depth: usize,
}

impl CommandQueue {
    pub fn new(depth: usize) -> Self {
        Self {
            commands: VecDeque::with_capacity(depth),
            depth: depth.max(1),
        }
    }

    /// Append a command, evicting the oldest entry when the queue is full
    ///
    /// The outcome reports the dropped command so the caller can surface the
    /// loss to the application.
    pub fn push(&mut self, command: OsdpCommand) -> EnqueueOutcome {
        if self.commands.len() < self.depth {
            self.commands.push_back(command);
            return EnqueueOutcome::Queued;
        }
        // Invariant: depth >= 1, so the front exists here
        let dropped = self.commands.pop_front();
        self.commands.push_back(command);
        match dropped {
            Some(old) => EnqueueOutcome::QueuedDroppedOldest(old),
            None => EnqueueOutcome::Queued,
        }
    }

    /// The command whose exchange runs next (or is in flight)
    pub fn front(&self) -> Option<&OsdpCommand> {
        self.commands.front()
    }

    /// Remove the front command after its reply was accepted
    pub fn complete_front(&mut self) -> Option<OsdpCommand> {
        self.commands.pop_front()
    }

    /// Drop every pending command, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let n = self.commands.len();
        self.commands.clear();
        n
    }

    /// Drop pending commands, optionally keeping the in-flight front entry
    pub fn cancel_pending(&mut self, keep_front: bool) -> usize {
        if keep_front && !self.commands.is_empty() {
            let n = self.commands.len() - 1;
            self.commands.truncate(1);
            n
        } else {
            self.clear()
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
