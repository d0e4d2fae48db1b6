// OpenCode Bridge Library
// Exports the lifecycle core for IDE hosts and the CLI binary

pub mod config;
pub mod editor_state;
pub mod lifecycle;
pub mod opencode;

pub use config::{app_data_dir, BridgeConfig, ConfigError, Settings};
pub use editor_state::EditorState;
pub use lifecycle::{
    Lifecycle, LifecycleError, LifecycleObserver, LifecycleOptions, LifecycleState,
};

pub use opencode::binary::{is_opencode_installed, resolve_binary_path};
pub use opencode::cleanup::{CleanupPolicy, DEFAULT_MAX_SESSIONS};
pub use opencode::client::{Session, SessionApiError, SessionClient};
pub use opencode::health::{HealthCheck, HttpHealthProbe};
pub use opencode::server::{ServerError, ServerManager, ServerStatus};
