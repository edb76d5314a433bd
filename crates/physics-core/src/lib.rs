//! Low-level helpers shared by the physics orchestration crates.
//!
//! Provides atomic file writes for artifacts and reports, plus the clock
//! helpers used for session, event, and artifact timestamps.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{write_bytes_atomic, write_text_atomic};
pub use time_utils::{current_unix_timestamp_ms, utc_now};

#[cfg(test)]
mod tests {
    use std::fs::{read, read_to_string};

    use super::*;

    #[test]
    fn unit_utc_now_tracks_unix_clock() {
        let before_ms = current_unix_timestamp_ms();
        let now = utc_now();
        let after_ms = current_unix_timestamp_ms();
        let now_ms = u64::try_from(now.timestamp_millis()).expect("positive timestamp");
        assert!(now_ms >= before_ms);
        assert!(now_ms <= after_ms);
    }

    #[test]
    fn functional_write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested").join("report.md");
        write_text_atomic(&path, "# report").expect("write");
        assert_eq!(read_to_string(&path).expect("read"), "# report");
    }

    #[test]
    fn functional_write_bytes_atomic_replaces_existing_file() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("plot.png");
        write_bytes_atomic(&path, &[1, 2, 3]).expect("first write");
        write_bytes_atomic(&path, &[9, 8]).expect("second write");
        assert_eq!(read(&path).expect("read"), vec![9, 8]);
        let leftovers = std::fs::read_dir(tempdir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn regression_write_bytes_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_bytes_atomic(tempdir.path(), b"data").expect_err("directory target");
        assert!(error.to_string().contains("is a directory"));
    }
}
