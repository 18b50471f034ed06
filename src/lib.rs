pub mod cli;
pub mod client;
pub mod compact;
pub mod config;
pub mod error;
pub mod events;
pub mod fanin;
pub mod hash;
pub mod model;
pub mod orchestrator;
pub mod poller;
pub mod state;
pub mod transport;
pub mod watcher;

pub use client::SyncClient;
pub use config::SyncConfig;
pub use error::{ErrorMessage, SyncError};
pub use events::{ChangeSink, EventSource};
pub use model::{ChangeEvent, FileAction, FileRecord, PullResponse};
pub use state::FileSystemState;
pub use transport::RemoteTransport;
