//! mercury record schema
//!
//! Defines the unit of output work handed from workers to the output
//! coordinator, and the JSON summary written for each fingerprinted packet.

mod record;
mod summary;

pub use record::{PacketRecord, RecordPayload};
pub use summary::{AnalysisResult, DestinationClass, FingerprintSummary, SummaryError};
