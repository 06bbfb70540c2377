//! Append-only JSONL file per engine instance.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::JsonLogEntry;

/// Appends entries to `<logs_dir>/raw/<date>_<instance>.jsonl`
pub struct InstanceLogWriter {
    instance: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl InstanceLogWriter {
    /// Open (or create) today's file for `instance`
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        let instance = instance.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, instance));

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            instance,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush
    pub fn write(&self, entry: &JsonLogEntry) -> std::io::Result<()> {
        let line = entry.to_json_line().map_err(std::io::Error::other)?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for InstanceLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Every entry of every instance under `logs_dir`, ordered by timestamp.
///
/// Lines that do not parse are skipped.
pub fn read_all_entries(logs_dir: impl AsRef<Path>) -> std::io::Result<Vec<JsonLogEntry>> {
    let raw_dir = logs_dir.as_ref().join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            let content = fs::read_to_string(&path)?;
            entries.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .filter_map(|line| JsonLogEntry::from_json_line(line).ok()),
            );
        }
    }

    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writer_file_per_instance() {
        let temp = TempDir::new().unwrap();
        let logs_dir = temp.path().join("logs");

        let reef = InstanceLogWriter::new(&logs_dir, "reef").unwrap();
        let lagoon = InstanceLogWriter::new(&logs_dir, "lagoon").unwrap();

        assert_ne!(reef.path(), lagoon.path());
        assert!(reef.path().starts_with(logs_dir.join("raw")));
        assert!(reef.path().to_string_lossy().ends_with("_reef.jsonl"));
    }

    #[test]
    fn test_entries_read_back_across_instances() {
        let temp = TempDir::new().unwrap();
        let logs_dir = temp.path().join("logs");

        let reef = InstanceLogWriter::new(&logs_dir, "reef").unwrap();
        let lagoon = InstanceLogWriter::new(&logs_dir, "lagoon").unwrap();
        reef.write(&JsonLogEntry::new("info", "reef", "shoal_core", "Transport started"))
            .unwrap();
        lagoon
            .write(&JsonLogEntry::new("warn", "lagoon", "shoal_core", "Skipping address"))
            .unwrap();

        // Garbage lines are ignored
        fs::write(logs_dir.join("raw").join("broken.jsonl"), "not json\n").unwrap();

        let entries = read_all_entries(&logs_dir).unwrap();
        assert_eq!(entries.len(), 2);
        let instances: Vec<&str> = entries.iter().map(|e| e.instance.as_str()).collect();
        assert!(instances.contains(&"reef"));
        assert!(instances.contains(&"lagoon"));
    }

    #[test]
    fn test_missing_directory_reads_empty() {
        let temp = TempDir::new().unwrap();
        assert!(read_all_entries(temp.path().join("nowhere")).unwrap().is_empty());
    }
}
