use market_sync::SyncHandle;

#[derive(Clone)]
pub struct AppState {
    /// Handle to the sync runtime every handler reads from and commands.
    pub sync: SyncHandle,
}

impl AppState {
    pub fn new(sync: SyncHandle) -> Self {
        Self { sync }
    }
}
