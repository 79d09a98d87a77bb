//! Transfer progress accounting and display helpers
//!
//! `bytes_done` advances after each acked chunk. The current speed is a
//! one-second sliding average over acked bytes; the average speed is
//! cumulative; the ETA extrapolates from the average.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::protocol::types::{DeviceId, TransferDirection, TransferId};
use crate::statemachine::TransferState;

/// Sliding window for the current-speed estimate.
const SPEED_WINDOW: Duration = Duration::from_secs(1);

/// Volatile progress snapshot for one transfer.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    pub id: TransferId,
    pub state: TransferState,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files_done: u32,
    pub files_total: u32,
    pub current_file: Option<String>,
    pub current_speed_bps: f64,
    pub average_speed_bps: f64,
    pub eta: Duration,
    pub elapsed: Duration,
}

impl TransferProgress {
    /// Completion ratio in `0.0..=1.0`.
    pub fn ratio(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.bytes_total as f64).min(1.0)
    }

    pub fn speed_string(&self) -> String {
        format_speed(self.current_speed_bps)
    }

    pub fn eta_string(&self) -> String {
        format_duration(self.eta)
    }

    pub fn progress_string(&self) -> String {
        format!(
            "{} / {}",
            format_bytes(self.bytes_done),
            format_bytes(self.bytes_total)
        )
    }
}

/// Outcome for one file inside a terminal transfer.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub relative_path: String,
    pub size: u64,
    /// Where the file landed (receive side only).
    pub saved_path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Terminal report for one transfer.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub id: TransferId,
    pub peer_id: DeviceId,
    pub direction: TransferDirection,
    pub final_state: TransferState,
    pub bytes_done: u64,
    pub duration: Duration,
    pub avg_speed_bps: f64,
    pub successful: Vec<FileOutcome>,
    pub failed: Vec<FileOutcome>,
    pub skipped: Vec<FileOutcome>,
    pub error_message: Option<String>,
}

impl TransferResult {
    /// Total size across all partitions.
    pub fn accounted_bytes(&self) -> u64 {
        self.successful
            .iter()
            .chain(&self.failed)
            .chain(&self.skipped)
            .map(|f| f.size)
            .sum()
    }
}

/// Mutable progress tracker owned by an active transfer.
#[derive(Debug)]
pub struct ProgressTracker {
    id: TransferId,
    bytes_total: u64,
    files_total: u32,
    bytes_done: u64,
    files_done: u32,
    current_file: Option<String>,
    started: Instant,
    window: VecDeque<(Instant, u64)>,
    window_bytes: u64,
}

impl ProgressTracker {
    pub fn new(id: TransferId, bytes_total: u64, files_total: u32) -> Self {
        ProgressTracker {
            id,
            bytes_total,
            files_total,
            bytes_done: 0,
            files_done: 0,
            current_file: None,
            started: Instant::now(),
            window: VecDeque::new(),
            window_bytes: 0,
        }
    }

    pub fn set_current_file(&mut self, name: Option<String>) {
        self.current_file = name;
    }

    pub fn file_done(&mut self) {
        self.files_done += 1;
    }

    /// Record `n` freshly acked bytes.
    pub fn add_bytes(&mut self, n: u64) {
        self.bytes_done += n;
        let now = Instant::now();
        self.window.push_back((now, n));
        self.window_bytes += n;
        self.trim(now);
    }

    fn trim(&mut self, now: Instant) {
        while let Some((at, bytes)) = self.window.front().copied() {
            if now.duration_since(at) <= SPEED_WINDOW {
                break;
            }
            self.window.pop_front();
            self.window_bytes -= bytes;
        }
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    pub fn files_done(&self) -> u32 {
        self.files_done
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Snapshot with derived speeds and ETA.
    pub fn snapshot(&mut self, state: TransferState) -> TransferProgress {
        let now = Instant::now();
        self.trim(now);

        let elapsed = self.started.elapsed();
        let current = self.window_bytes as f64 / SPEED_WINDOW.as_secs_f64();
        let average = if elapsed.as_secs_f64() > 0.0 {
            self.bytes_done as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let remaining = self.bytes_total.saturating_sub(self.bytes_done);
        let eta = if remaining == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(remaining as f64 / average.max(1.0))
        };

        TransferProgress {
            id: self.id,
            state,
            bytes_done: self.bytes_done,
            bytes_total: self.bytes_total,
            files_done: self.files_done,
            files_total: self.files_total,
            current_file: self.current_file.clone(),
            current_speed_bps: current,
            average_speed_bps: average,
            eta,
            elapsed,
        }
    }
}

// =============================================================================
// Display helpers
// =============================================================================

/// Human-readable byte count: `1.5 MB`, `320 B`.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Human-readable rate: `2.0 MB/s`.
pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second.max(0.0) as u64))
}

/// Human-readable duration: `1h 4m`, `3m 12s`, `45s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// MIME type guessed from the file extension.
pub fn detect_mime_type(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("odt") => "application/vnd.oasis.opendocument.text",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("md") => "text/markdown",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz") => "application/gzip",
        Some("7z") => "application/x-7z-compressed",
        Some("rs") => "text/x-rust",
        Some("py") => "text/x-python",
        Some("c") | Some("h") => "text/x-c",
        Some("sh") => "application/x-sh",
        _ => "application/octet-stream",
    }
}
