//! Registration progress records.
//!
//! The daemon writes newline-delimited ASCII records to the progress pipe:
//!
//! ```text
//! <bytes-complete> <bytes-total> <message>\n
//! error <message>\n
//! ```
//!
//! Reads from a non-blocking pipe split lines arbitrarily, so
//! [`ProgressDecoder`] buffers the trailing partial line between calls to
//! [`ProgressDecoder::feed`].

use crate::error::ProtocolError;

/// Longest record the decoder buffers while waiting for its newline.
pub const MAX_RECORD_LEN: usize = 4096;

/// One decoded progress line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressRecord {
    /// Download progress.
    Progress {
        /// Human-readable stage.
        message: String,
        /// Bytes done.
        complete: u64,
        /// Bytes expected.
        total: u64,
    },
    /// The fetch failed; registration aborts.
    Error(String),
}

impl ProgressRecord {
    /// Parse one line (without its newline).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (first, rest) = line.split_once(' ').unwrap_or((line, ""));
        if first == "error" {
            return Ok(Self::Error(rest.to_owned()));
        }
        let (total, message) = rest.split_once(' ').unwrap_or((rest, ""));
        match (first.parse(), total.parse()) {
            (Ok(complete), Ok(total)) => {
                Ok(Self::Progress {
                    message: message.to_owned(),
                    complete,
                    total,
                })
            }
            _ => Err(ProtocolError::Malformed(format!("bad progress record {line:?}"))),
        }
    }
}

/// Incremental line decoder for the progress pipe.
#[derive(Debug, Default)]
pub struct ProgressDecoder {
    buf: Vec<u8>,
}

impl ProgressDecoder {
    /// Fresh decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every record completed by them.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ProgressRecord>, ProtocolError> {
        self.buf.extend_from_slice(data);
        let mut records = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = std::str::from_utf8(&line[..pos])
                .map_err(|_| ProtocolError::Malformed("non-text progress record".into()))?;
            if line.is_empty() {
                continue;
            }
            records.push(ProgressRecord::parse(line)?);
        }
        if self.buf.len() > MAX_RECORD_LEN {
            return Err(ProtocolError::Malformed(format!(
                "progress record exceeds {MAX_RECORD_LEN} bytes without a newline"
            )));
        }
        Ok(records)
    }

    /// Bytes of an unfinished line still buffered.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// End of stream: decode a final line that lacked its newline.
    pub fn finish(mut self) -> Result<Option<ProgressRecord>, ProtocolError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        self.buf.push(b'\n');
        Ok(self.feed(&[])?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_and_error_lines() {
        assert_eq!(
            ProgressRecord::parse("50 100 fetching manifest").unwrap(),
            ProgressRecord::Progress {
                message: "fetching manifest".into(),
                complete: 50,
                total: 100,
            }
        );
        assert_eq!(
            ProgressRecord::parse("error disk full").unwrap(),
            ProgressRecord::Error("disk full".into())
        );
        assert_eq!(ProgressRecord::parse("error").unwrap(), ProgressRecord::Error(String::new()));
        assert_eq!(
            ProgressRecord::parse("0 0").unwrap(),
            ProgressRecord::Progress {
                message: String::new(),
                complete: 0,
                total: 0,
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(ProgressRecord::parse("fifty 100 x").is_err());
        assert!(ProgressRecord::parse("50").is_err());
        assert!(ProgressRecord::parse("-1 10 x").is_err());
    }

    #[test]
    fn split_reads_are_reassembled() {
        let mut dec = ProgressDecoder::new();
        assert!(dec.feed(b"50 10").unwrap().is_empty());
        assert_eq!(dec.pending(), 5);
        let recs = dec.feed(b"0 fetching\n100 100 do").unwrap();
        assert_eq!(
            recs,
            vec![ProgressRecord::Progress {
                message: "fetching".into(),
                complete: 50,
                total: 100,
            }]
        );
        let recs = dec.feed(b"ne\n\nerror boom\n").unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1], ProgressRecord::Error("boom".into()));
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn unterminated_last_line_is_kept() {
        let mut dec = ProgressDecoder::new();
        assert!(dec.feed(b"error out of space").unwrap().is_empty());
        assert_eq!(dec.finish().unwrap(), Some(ProgressRecord::Error("out of space".into())));
        assert_eq!(ProgressDecoder::new().finish().unwrap(), None);
    }

    #[test]
    fn endless_line_is_rejected() {
        let mut dec = ProgressDecoder::new();
        assert!(dec.feed(&[b'7'; MAX_RECORD_LEN]).unwrap().is_empty());
        assert!(matches!(dec.feed(b"7"), Err(ProtocolError::Malformed(_))));

        // A long line that does end is fine.
        let mut dec = ProgressDecoder::new();
        let mut line = b"1 2 ".to_vec();
        line.extend_from_slice(&[b'x'; MAX_RECORD_LEN]);
        line.push(b'\n');
        assert_eq!(dec.feed(&line).unwrap().len(), 1);
    }
}
