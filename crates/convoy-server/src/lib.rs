//! Convoy control plane
//!
//! Startup concerns of the `convoy-cp` binary:
//! - `config` - layered configuration (file, environment, command line)
//! - `logging` - console and rolling file logging
//! - `reconcile` - the loop that turns stored resources into proxy snapshots
//! - `shutdown` - signal handling

pub mod config;
pub mod logging;
pub mod reconcile;
pub mod shutdown;

pub use config::Configuration;
pub use logging::{LoggingConfig, init_logging};
pub use reconcile::{ReconcileReport, Reconciler, load_store};
pub use shutdown::{ShutdownSignal, wait_for_shutdown_signal};
