//! Activity accounting for the edge pipeline.
//!
//! Tracks what the agent has processed and produced so its behaviour can be
//! audited after the fact.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
