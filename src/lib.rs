pub mod config;
pub mod debounce;
pub mod detect;
pub mod error;
pub mod logging;
pub mod manager;
pub mod model;
pub mod parsers;
pub mod record;
pub mod source;
pub mod statements;
pub mod watch;

pub use config::{is_applicable, CoverageConfig, ResolvePolicy};
pub use error::{CovwatchError, LoadError, ParseError, Result};
pub use manager::{CoverageManager, Notifier, RenderConsumer, RootHandle};
pub use model::{ConsumerId, LineSet, LoadStatus, RootStatus};
pub use statements::{statements, StatementParser};
