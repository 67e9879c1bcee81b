use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Running counters for a data operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total_records: u64,
    pub processed_records: u64,
    pub failed_records: u64,
    pub bytes_transferred: u64,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl Progress {
    pub fn started_now() -> Self {
        let now = Utc::now();
        Self {
            total_records: 0,
            processed_records: 0,
            failed_records: 0,
            bytes_transferred: 0,
            start_time: now,
            last_update_time: now,
        }
    }

    pub fn record_processed(&mut self, count: u64, bytes: u64) {
        self.processed_records += count;
        self.bytes_transferred += bytes;
        self.last_update_time = Utc::now();
    }

    /// Completion percentage; 0 when the total is unknown.
    pub fn percentage(&self) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        self.processed_records as f64 / self.total_records as f64 * 100.0
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::started_now()
    }
}

/// Statistics reported by a processor plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProcessStats {
    pub records_in: u64,
    pub records_out: u64,
    pub filtered: u64,
    pub errors: u64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// Statistics reported by an output plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WriteStats {
    pub records_written: u64,
    pub records_failed: u64,
    pub bytes_written: u64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(de)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_zero_without_total() {
        let progress = Progress::started_now();
        assert_eq!(progress.percentage(), 0.0);
    }

    #[test]
    fn percentage_reflects_processed_share() {
        let mut progress = Progress::started_now();
        progress.total_records = 200;
        progress.record_processed(50, 1024);
        assert_eq!(progress.percentage(), 25.0);
        assert_eq!(progress.bytes_transferred, 1024);
    }
}
