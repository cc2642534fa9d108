//! Output module for streaming crawl results and reports
//!
//! This module handles:
//! - The writable record channel each job ends with exactly one close or abort
//! - Serializing the final record array
//! - The per-job crawl report

mod channel;
pub mod stats;
mod traits;

pub use channel::{output_channel, ChannelSink, OutputStream, WriterSink};
pub use stats::{format_report, print_report, CrawlReport, FailureRecord};
pub use traits::{OutputError, OutputResult, OutputSink};

use crate::storage::SchoolRecord;

/// Serializes records as the JSON array written to an output sink
pub fn encode_records(records: &[SchoolRecord]) -> OutputResult<Vec<u8>> {
    serde_json::to_vec(records).map_err(|e| OutputError::Write(e.to_string()))
}

/// Writes the record array and closes the sink
///
/// If serialization or the write fails, the sink is aborted instead so the consumer
/// still observes a terminal signal.
pub fn emit_records(mut sink: Box<dyn OutputSink>, records: &[SchoolRecord]) -> OutputResult<()> {
    let written = encode_records(records).and_then(|bytes| sink.write(&bytes));

    match written {
        Ok(()) => sink.close(),
        Err(e) => {
            sink.abort(&e.to_string());
            Err(e)
        }
    }
}
