//! Producer data files.
//!
//! One `key:value` pair per line, split on the first `:`. Keys and values
//! are trimmed. Blank lines, `#` comments, lines without a `:` and lines
//! with an empty key are skipped.

use aggsync_core::Reading;
use std::path::{Path, PathBuf};

/// Parse data file text into a reading, keeping line order.
#[must_use]
pub fn parse_reading(text: &str) -> Reading {
    let mut reading = Reading::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                reading.push(key.trim(), value.trim());
            }
            _ => {
                tracing::warn!(line = index + 1, content = line, "Skipping malformed data line");
            }
        }
    }

    reading
}

/// Read and parse a data file.
///
/// # Errors
///
/// Returns error if the file cannot be read.
pub async fn load_reading(path: impl AsRef<Path>) -> Result<Reading, ReadingError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ReadingError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let reading = parse_reading(&text);
    tracing::debug!(path = %path.display(), pairs = reading.len(), "Loaded data file");
    Ok(reading)
}

/// Errors from loading a data file.
#[derive(Debug, thiserror::Error)]
pub enum ReadingError {
    /// File could not be read
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_key_value_lines() {
        let reading = parse_reading(
            "id:IDS60901\nname: Adelaide (West Terrace /  ngayirdapira)\n\nair_temp:13.3\n",
        );
        let pairs: Vec<_> = reading.iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("id", "IDS60901"),
                ("name", "Adelaide (West Terrace /  ngayirdapira)"),
                ("air_temp", "13.3"),
            ]
        );
    }

    #[test]
    fn value_keeps_later_colons() {
        let reading = parse_reading("local_date_time:15/04:00pm\n");
        let pairs: Vec<_> = reading.iter().collect();
        assert_eq!(pairs, vec![("local_date_time", "15/04:00pm")]);
    }

    #[test]
    fn skips_comments_and_malformed_lines() {
        let reading = parse_reading("# station\nno separator\n:orphan\r\nwind: 5\r\n");
        let pairs: Vec<_> = reading.iter().collect();
        assert_eq!(pairs, vec![("wind", "5")]);
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "temp:20").unwrap();
        writeln!(file, "humidity:40").unwrap();

        let reading = load_reading(file.path()).await.unwrap();
        assert_eq!(reading.len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_reading(dir.path().join("absent.txt")).await.unwrap_err();
        assert!(err.to_string().contains("absent.txt"));
    }
}
