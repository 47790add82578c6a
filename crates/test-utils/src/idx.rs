//! Multi-message files with a matching side-car index.

use chrono::{DateTime, Utc};

use crate::grib2::Grib2Builder;

/// A concatenated GRIB2 file and its `.idx` text.
#[derive(Debug, Clone, Default)]
pub struct IndexedFile {
    pub bytes: Vec<u8>,
    pub offsets: Vec<u64>,
    lines: Vec<String>,
}

impl IndexedFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message; `description` is the index text after the date,
    /// e.g. `"APCP:surface:0-24 hour acc fcst:"`.
    pub fn push(mut self, reference_time: DateTime<Utc>, description: &str, message: Vec<u8>) -> Self {
        let offset = self.bytes.len() as u64;
        self.lines.push(format!(
            "{}:{}:d={}:{}",
            self.lines.len() + 1,
            offset,
            reference_time.format("%Y%m%d%H"),
            description
        ));
        self.offsets.push(offset);
        self.bytes.extend(message);
        self
    }

    /// Append a message built from `builder`, using its reference time.
    pub fn push_built(self, reference_time: DateTime<Utc>, description: &str, builder: &Grib2Builder) -> Self {
        self.push(reference_time, description, builder.clone().with_reference_time(reference_time).build())
    }

    /// Index text, one line per message with a trailing newline.
    pub fn index_text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }

    /// Bytes of message `i` as a range GET would return them.
    pub fn message_bytes(&self, i: usize) -> &[u8] {
        let start = self.offsets[i] as usize;
        let end = self
            .offsets
            .get(i + 1)
            .map(|o| *o as usize)
            .unwrap_or(self.bytes.len());
        &self.bytes[start..end]
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Index text with arbitrary offsets, for matcher tests that never download.
pub fn index_text(date: &str, entries: &[(u64, &str)]) -> String {
    entries
        .iter()
        .enumerate()
        .map(|(i, (offset, description))| format!("{}:{}:d={}:{}\n", i + 1, offset, date, description))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_offsets_follow_message_lengths() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let builder = Grib2Builder::new();
        let first_len = builder.clone().with_reference_time(t).build().len() as u64;
        let file = IndexedFile::new()
            .push_built(t, "TMP:2 m above ground:6 hour fcst:", &builder)
            .push_built(t, "TMP:2 m above ground:12 hour fcst:", &builder);

        assert_eq!(file.len(), 2);
        assert_eq!(file.offsets, vec![0, first_len]);
        assert_eq!(file.message_bytes(1).len() as u64, file.bytes.len() as u64 - first_len);
        let text = file.index_text();
        assert!(text.starts_with("1:0:d=2024011512:TMP:2 m above ground:6 hour fcst:\n"));
        assert!(text.contains(&format!("2:{}:d=2024011512:", first_len)));
    }

    #[test]
    fn test_plain_index_text() {
        let text = index_text("2024011500", &[(0, "APCP:surface:0-6 hour acc fcst:"), (100, "TMP:surface:6 hour fcst:")]);
        assert_eq!(
            text,
            "1:0:d=2024011500:APCP:surface:0-6 hour acc fcst:\n2:100:d=2024011500:TMP:surface:6 hour fcst:\n"
        );
    }
}
