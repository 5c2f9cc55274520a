/*
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! Consumer-side flow control for pub/sub clients
//!
//! Two independent components:
//!
//! * [`memory_limit::MemoryLimitController`] admits, blocks or refuses callers
//!   reserving memory for received payloads.
//! * [`ack_grouping::AckGroupingTracker`] groups individual and cumulative
//!   acknowledgments before handing them to the connection layer, and answers
//!   duplicate checks for acks still waiting in the group.

use thiserror::Error;

pub mod ack_grouping;
pub mod cli;
pub mod config;
pub mod memory_limit;
pub mod message_id;
pub mod metrics;

pub use ack_grouping::{new_ack_grouping_tracker, AckGroupingTracker, AckSender};
pub use config::AckGroupingOptions;
pub use memory_limit::MemoryLimitController;
pub use message_id::MessageId;

/// Error in the flow control components
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The tracker was closed, or its worker is gone.
    #[error("Ack grouping tracker is closed")]
    TrackerClosed,

    #[error("Unknown error: {0}")]
    Unknown(String),
}
