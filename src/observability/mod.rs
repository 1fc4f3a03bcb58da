pub mod tracing;

pub use self::tracing::{LogFormat, init, install_panic_hook};
