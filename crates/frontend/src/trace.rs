//! Arrival-interval trace replay (spec §4.M).
//!
//! Grounded on `original_source/framework/trace/trace.py::RequestGenerator`:
//! reads a CSV trace, samples every `sample_interval`-th row, replicates
//! each sampled row `scale_factor` times, and replays the resulting
//! sequence at the inter-arrival gaps recorded in the trace's `TIMESTAMP`
//! column, pacing each send against however long the send itself took.

use std::time::Instant;

use chrono::NaiveDateTime;
use tracing::info;

use kairos_transport::{Message, MessageHandler, MessageKind};

use crate::error::FrontendError;
use crate::oracle::DatasetOracle;

const TIMESTAMP_COLUMN: &str = "TIMESTAMP";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One row of the replayed trace, carrying just what pacing needs.
#[derive(Debug, Clone)]
struct SampledRow {
    timestamp: NaiveDateTime,
}

pub struct RequestGenerator {
    service_name: String,
    entry_agent_name: String,
    sampled: Vec<SampledRow>,
    intervals: Vec<f64>,
}

impl RequestGenerator {
    /// Reads `csv_file_path`, samples every `sample_interval`-th row, and
    /// replicates each sampled row `scale_factor` times.
    pub fn from_csv_file(
        csv_file_path: impl AsRef<std::path::Path>,
        sample_interval: usize,
        scale_factor: usize,
        service_name: impl Into<String>,
        entry_agent_name: impl Into<String>,
    ) -> Result<Self, FrontendError> {
        let mut reader = csv::Reader::from_path(csv_file_path)?;
        let mut raw = Vec::new();
        for record in reader.deserialize::<std::collections::HashMap<String, String>>() {
            raw.push(record?);
        }

        let stride = sample_interval.max(1);
        let sampled_rows: Vec<_> = raw.into_iter().step_by(stride).collect();

        let mut sampled = Vec::with_capacity(sampled_rows.len() * scale_factor.max(1));
        for row in &sampled_rows {
            let raw_ts = row.get(TIMESTAMP_COLUMN).ok_or_else(|| {
                FrontendError::Config(format!("trace row missing '{TIMESTAMP_COLUMN}' column"))
            })?;
            let timestamp = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT)?;
            for _ in 0..scale_factor.max(1) {
                sampled.push(SampledRow { timestamp });
            }
        }

        let intervals = sampled
            .windows(2)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0)
            .collect();

        Ok(Self {
            service_name: service_name.into(),
            entry_agent_name: entry_agent_name.into(),
            sampled,
            intervals,
        })
    }

    pub fn len(&self) -> usize {
        self.sampled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sampled.is_empty()
    }

    /// Sends one request per sampled row to the entry agent, sleeping off
    /// whatever's left of each row's inter-arrival gap after accounting for
    /// how long the send itself took.
    pub async fn start_generate(
        &self,
        handler: &MessageHandler,
        oracle: &dyn DatasetOracle,
    ) -> Result<(), FrontendError> {
        handler.add_target_mapping(&self.entry_agent_name, &self.entry_agent_name).await;

        for i in 0..self.sampled.len() {
            let t_start = Instant::now();

            let data = oracle.next_record(&self.service_name);
            let mut msg = Message::new(i as i64, self.service_name.clone(), MessageKind::Request);
            msg.set_origin_data(data);
            msg.set_start_time();
            handler.send(msg, &self.entry_agent_name).await?;
            info!(msg_id = i, service = %self.service_name, target = %self.entry_agent_name, "sent trace request");

            let send_elapsed = t_start.elapsed().as_secs_f64();
            if let Some(&interval) = self.intervals.get(i) {
                if interval > send_elapsed {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(interval - send_elapsed)).await;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_trace(rows: &[(&str, &str)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "TIMESTAMP,VALUE").unwrap();
        for (ts, value) in rows {
            writeln!(file, "{ts},{value}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn samples_with_stride_and_replicates_by_scale_factor() {
        let file = write_trace(&[
            ("2024-01-01 00:00:00.000", "a"),
            ("2024-01-01 00:00:01.000", "b"),
            ("2024-01-01 00:00:02.000", "c"),
            ("2024-01-01 00:00:03.000", "d"),
        ]);

        let generator =
            RequestGenerator::from_csv_file(file.path(), 2, 2, "draft", "writer").unwrap();

        // Stride 2 keeps rows 0 and 2; scale factor 2 doubles each.
        assert_eq!(generator.len(), 4);
    }

    #[test]
    fn intervals_reflect_sampled_timestamp_gaps() {
        let file = write_trace(&[
            ("2024-01-01 00:00:00.000", "a"),
            ("2024-01-01 00:00:02.500", "b"),
        ]);

        let generator =
            RequestGenerator::from_csv_file(file.path(), 1, 1, "draft", "writer").unwrap();

        assert_eq!(generator.len(), 2);
        assert_eq!(generator.intervals, vec![2.5]);
    }

    #[test]
    fn missing_timestamp_column_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "VALUE\na").unwrap();
        file.flush().unwrap();

        let result = RequestGenerator::from_csv_file(file.path(), 1, 1, "draft", "writer");
        assert!(result.is_err());
    }
}
