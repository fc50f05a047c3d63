pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod source;

pub use bridge::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use metrics::*;
pub use pipeline::*;
pub use source::*;
