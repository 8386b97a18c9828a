use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::crypto::checksum::Checksum;

/// Where sessions publish presentation events.
pub type EventSender = mpsc::UnboundedSender<ProgressEvent>;

/// Tracks one file's upload progress: percent, speed and ETA.
///
/// Percent is computed from the confirmed cursor plus the bytes of the chunk
/// in flight, and never moves backwards, even when a new chunk restarts the
/// transport's own counter at zero.
pub struct ProgressTracker {
    file_size: u64,
    chunk_size: u64,
    /// Bytes confirmed by the server.
    cursor: u64,
    /// Bytes of the current chunk handed to the transport.
    in_flight: u64,
    last_percent: u8,
    /// Sliding window of (timestamp, cumulative_bytes) for speed smoothing.
    speed_samples: VecDeque<(Instant, u64)>,
    /// Max age of samples in the window (3 seconds).
    window_secs: f64,
}

/// Progress numbers at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub speed_bps: u64,
    pub eta_seconds: u32,
}

impl ProgressTracker {
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        let now = Instant::now();
        let mut samples = VecDeque::with_capacity(64);
        samples.push_back((now, 0));

        Self {
            file_size,
            chunk_size: chunk_size.max(1),
            cursor: 0,
            in_flight: 0,
            last_percent: 0,
            speed_samples: samples,
            window_secs: 3.0,
        }
    }

    /// A new chunk starts after `cursor` confirmed bytes.
    pub fn begin_chunk(&mut self, cursor: u64) {
        self.cursor = cursor.min(self.file_size);
        self.in_flight = 0;
    }

    /// Records a transport tick for the chunk in flight.
    pub fn tick(&mut self, loaded: u64, total: u64) -> ProgressSnapshot {
        let loaded = loaded.min(total);
        self.in_flight = loaded;

        let raw = if self.file_size < self.chunk_size {
            // Whole file fits one chunk: the transport's own ratio is the answer.
            ratio_percent(loaded, total)
        } else {
            ratio_percent(self.cursor + loaded, self.file_size)
        };
        let floor = ratio_percent(self.cursor, self.file_size.max(1));
        self.last_percent = raw.max(floor).max(self.last_percent).min(100);

        self.sample();
        self.snapshot()
    }

    /// The chunk was confirmed; `cursor` is the new confirmed offset.
    pub fn confirm(&mut self, cursor: u64) -> ProgressSnapshot {
        self.begin_chunk(cursor);
        let confirmed = if self.file_size == 0 {
            100
        } else {
            ratio_percent(self.cursor, self.file_size)
        };
        self.last_percent = self.last_percent.max(confirmed).min(100);
        self.sample();
        self.snapshot()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.cursor + self.in_flight
    }

    /// Current transfer speed in bytes per second (moving average).
    pub fn speed_bps(&self) -> u64 {
        let (Some(oldest), Some(newest)) = (self.speed_samples.front(), self.speed_samples.back())
        else {
            return 0;
        };
        let elapsed = newest.0.duration_since(oldest.0).as_secs_f64();
        if elapsed < 0.01 {
            return 0;
        }
        let bytes_diff = newest.1.saturating_sub(oldest.1);
        (bytes_diff as f64 / elapsed) as u64
    }

    /// Estimated seconds remaining.
    pub fn eta_seconds(&self) -> u32 {
        let speed = self.speed_bps();
        if speed == 0 {
            return 0;
        }
        let remaining = self.file_size.saturating_sub(self.bytes_sent());
        (remaining / speed) as u32
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.last_percent,
            bytes_sent: self.bytes_sent(),
            bytes_total: self.file_size,
            speed_bps: self.speed_bps(),
            eta_seconds: self.eta_seconds(),
        }
    }

    fn sample(&mut self) {
        let now = Instant::now();
        self.speed_samples.push_back((now, self.bytes_sent()));

        // Evict old samples outside the window
        let Some(cutoff) = now.checked_sub(Duration::from_secs_f64(self.window_secs)) else {
            return;
        };
        while self.speed_samples.len() > 2 {
            if self.speed_samples[0].0 < cutoff {
                self.speed_samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// `round(part / whole * 100)`, clamped to 100. An empty whole counts as 0%.
fn ratio_percent(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 0;
    }
    let pct = (part as f64 / whole as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// How a status line should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Success,
    Danger,
}

/// Events for the presentation layer. The core only emits these; it never
/// touches presentation state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    HashStart {
        name: String,
    },
    HashEnd {
        name: String,
        checksum: Option<Checksum>,
    },
    Progress {
        checksum: Checksum,
        percent: u8,
        bytes_sent: u64,
        bytes_total: u64,
        speed_bps: u64,
        eta_seconds: u32,
        /// Set on the final mark of a failed upload.
        failed: bool,
    },
    Status {
        checksum: Checksum,
        message: String,
        severity: Severity,
    },
    /// Stored file is viewable at `url`.
    Completed {
        checksum: Checksum,
        url: Option<String>,
    },
    /// Verbatim field error list from the server.
    Error {
        messages: Vec<String>,
    },
    /// Short transient notification, e.g. a toast.
    Notify {
        severity: Severity,
        message: String,
    },
}

impl ProgressEvent {
    pub fn progress(checksum: &Checksum, snapshot: ProgressSnapshot) -> Self {
        Self::Progress {
            checksum: checksum.clone(),
            percent: snapshot.percent,
            bytes_sent: snapshot.bytes_sent,
            bytes_total: snapshot.bytes_total,
            speed_bps: snapshot.speed_bps,
            eta_seconds: snapshot.eta_seconds,
            failed: false,
        }
    }

    pub fn status(checksum: &Checksum, message: impl Into<String>, severity: Severity) -> Self {
        Self::Status {
            checksum: checksum.clone(),
            message: message.into(),
            severity,
        }
    }
}
