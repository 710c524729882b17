use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

const LOG_DIR: &str = ".driftpatch";
const LOG_FILE: &str = "change_log.jsonl";
const MAX_ENTRIES: usize = 500;

#[derive(Debug, Serialize)]
struct ChangeLogEntry<'a> {
    timestamp: &'a str,
    command: &'a str,
    target: &'a Path,
    action: &'a str,
    hunks: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoggedChange {
    pub timestamp: String,
    pub command: String,
    pub target: PathBuf,
    pub action: String,
    pub hunks: String,
}

pub fn record_change(command: &str, target: &Path, action: &str, hunks: &str) -> Result<()> {
    let log_path = ensure_log_file()?;
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".into());
    let entry = ChangeLogEntry {
        timestamp: &timestamp,
        command,
        target,
        action,
        hunks,
    };
    let json = serde_json::to_string(&entry)?;
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&log_path)
        .with_context(|| format!("opening {log_path:?}"))?;
    writeln!(file, "{json}")?;
    truncate_log(&log_path)?;
    Ok(())
}

pub fn read_recent(limit: usize) -> Result<Vec<LoggedChange>> {
    let log_path = PathBuf::from(LOG_DIR).join(LOG_FILE);
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(&log_path).with_context(|| format!("opening {log_path:?}"))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<LoggedChange>(&line) {
            entries.push(entry);
        }
    }
    let skip = entries.len().saturating_sub(limit);
    Ok(entries.split_off(skip))
}

fn ensure_log_file() -> Result<PathBuf> {
    let dir = PathBuf::from(LOG_DIR);
    if !dir.exists() {
        fs::create_dir_all(&dir).with_context(|| format!("creating {dir:?}"))?;
    }
    Ok(dir.join(LOG_FILE))
}

fn truncate_log(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("reading {path:?}"))?;
    let reader = BufReader::new(file);
    let lines: Vec<_> = reader.lines().collect::<Result<_, _>>()?;
    if lines.len() <= MAX_ENTRIES {
        return Ok(());
    }
    let keep = &lines[lines.len() - MAX_ENTRIES..];
    fs::write(path, keep.join("\n") + "\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_change_round_trips_as_json() {
        let entry = ChangeLogEntry {
            timestamp: "2024-08-28T18:08:38Z",
            command: "apply",
            target: Path::new("game/conf.lua"),
            action: "applied",
            hunks: "2/2 applied",
        };
        let json = serde_json::to_string(&entry).expect("serializes");
        let parsed: LoggedChange = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(parsed.command, "apply");
        assert_eq!(parsed.target, PathBuf::from("game/conf.lua"));
        assert_eq!(parsed.hunks, "2/2 applied");
    }
}
