pub mod comparison;
pub mod config;
pub mod console;
pub mod error;
pub mod feedback;
pub mod metrics;
pub mod normalizer;
pub mod poller;
pub mod quality;
pub mod reflection;
pub mod scenario;
pub mod services;
pub mod session;
pub mod trigger;

pub use comparison::*;
pub use config::*;
pub use console::*;
pub use error::{ConsoleError, Result};
pub use feedback::*;
pub use metrics::*;
pub use normalizer::*;
pub use poller::*;
pub use quality::*;
pub use reflection::*;
pub use scenario::*;
pub use services::*;
pub use session::*;
pub use trigger::*;
