pub mod http;
pub mod logging;
pub mod shutdown;

pub use http::admin_server;
pub use logging::{init_logging, LoggingConfig};
pub use shutdown::{wait_for_shutdown_signal, ShutdownSignal};
