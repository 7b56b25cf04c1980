//! Admin commands and the broadcast bus they travel on.

use tokio::sync::broadcast;

use crate::origin::{AppId, OriginId, OriginsSnapshot};

const DEFAULT_CAPACITY: usize = 256;

/// Admin command broadcast to every inventory. Each inventory ignores
/// commands addressed to another application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginsCommand {
    EnableOrigin { app_id: AppId, origin_id: OriginId },
    DisableOrigin { app_id: AppId, origin_id: OriginId },
    /// Asks the inventory to republish its current snapshot on the bus.
    GetOriginsInventorySnapshot { app_id: AppId },
}

impl OriginsCommand {
    pub fn enable(app_id: impl Into<AppId>, origin_id: impl Into<OriginId>) -> Self {
        OriginsCommand::EnableOrigin {
            app_id: app_id.into(),
            origin_id: origin_id.into(),
        }
    }

    pub fn disable(app_id: impl Into<AppId>, origin_id: impl Into<OriginId>) -> Self {
        OriginsCommand::DisableOrigin {
            app_id: app_id.into(),
            origin_id: origin_id.into(),
        }
    }

    pub fn get_snapshot(app_id: impl Into<AppId>) -> Self {
        OriginsCommand::GetOriginsInventorySnapshot {
            app_id: app_id.into(),
        }
    }

    pub fn app_id(&self) -> &AppId {
        match self {
            OriginsCommand::EnableOrigin { app_id, .. }
            | OriginsCommand::DisableOrigin { app_id, .. }
            | OriginsCommand::GetOriginsInventorySnapshot { app_id } => app_id,
        }
    }

    pub fn is_for(&self, app_id: &AppId) -> bool {
        self.app_id() == app_id
    }
}

/// Broadcast transport shared by all inventories of a process.
///
/// Commands flow in; snapshots flow out. Cloning yields another handle on
/// the same channels.
#[derive(Clone)]
pub struct EventBus {
    commands: broadcast::Sender<OriginsCommand>,
    snapshots: broadcast::Sender<OriginsSnapshot>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (commands, _) = broadcast::channel(capacity);
        let (snapshots, _) = broadcast::channel(capacity);
        Self { commands, snapshots }
    }

    /// Publishes a command to every subscribed inventory.
    pub fn send_command(&self, command: OriginsCommand) {
        // No subscribers is not an error: no inventory is running.
        let _ = self.commands.send(command);
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<OriginsCommand> {
        self.commands.subscribe()
    }

    pub fn post_snapshot(&self, snapshot: OriginsSnapshot) {
        let _ = self.snapshots.send(snapshot);
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<OriginsSnapshot> {
        self.snapshots.subscribe()
    }

    /// Number of inventories currently listening for commands.
    pub fn command_subscribers(&self) -> usize {
        self.commands.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
