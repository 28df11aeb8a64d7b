/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    /// The frame source gave up reconnecting
    StreamFailed(String),
    /// A finite source ran out of frames
    StreamEnded,
    UserRequest,
}

impl ShutdownReason {
    /// Process exit code once shutdown itself went cleanly
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::StreamFailed(_) => 2,
            _ => 0,
        }
    }
}

/// Names under which components report their lifecycle state
pub mod components {
    pub const CAPTURE: &str = "capture";
    pub const DATABASE_QUEUE: &str = "database_queue";
    pub const FILE_QUEUE: &str = "file_queue";
    pub const EVICTION: &str = "eviction";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const STATUS_FEED: &str = "status_feed";
    pub const STATUS_SERVER: &str = "status_server";
}
