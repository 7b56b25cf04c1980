use super::{AppId, Origin, RemoteHost};

/// Immutable view of an application's origins, split by state.
#[derive(Debug, Clone)]
pub struct OriginsSnapshot {
    app_id: AppId,
    active: Vec<RemoteHost>,
    inactive: Vec<RemoteHost>,
    disabled: Vec<RemoteHost>,
}

impl OriginsSnapshot {
    pub fn new(
        app_id: AppId,
        active: Vec<RemoteHost>,
        inactive: Vec<RemoteHost>,
        disabled: Vec<RemoteHost>,
    ) -> Self {
        Self {
            app_id,
            active,
            inactive,
            disabled,
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    pub fn active(&self) -> &[RemoteHost] {
        &self.active
    }

    pub fn inactive(&self) -> &[RemoteHost] {
        &self.inactive
    }

    pub fn disabled(&self) -> &[RemoteHost] {
        &self.disabled
    }

    pub fn active_origins(&self) -> impl Iterator<Item = &Origin> {
        self.active.iter().map(RemoteHost::origin)
    }

    pub fn inactive_origins(&self) -> impl Iterator<Item = &Origin> {
        self.inactive.iter().map(RemoteHost::origin)
    }

    pub fn disabled_origins(&self) -> impl Iterator<Item = &Origin> {
        self.disabled.iter().map(RemoteHost::origin)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.inactive.is_empty() && self.disabled.is_empty()
    }
}

/// Observer notified synchronously from the inventory's event worker.
pub trait OriginsChangeListener: Send + Sync {
    fn origins_changed(&self, snapshot: &OriginsSnapshot);
}

impl<F> OriginsChangeListener for F
where
    F: Fn(&OriginsSnapshot) + Send + Sync,
{
    fn origins_changed(&self, snapshot: &OriginsSnapshot) {
        self(snapshot)
    }
}
