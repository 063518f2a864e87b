//! Bounding-box telemetry written by the engine for `querygpubounds`.
//!
//! One record per line, tab separated: `id x y w h [extra...]`. Lines whose
//! first character is `#` are comments. Blank lines are ignored.

use crate::error::{DriftError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const COMMENT_MARKER: char = '#';
pub const FIELD_DELIMITER: char = '\t';
const MIN_FIELDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundsRecord {
    pub id: i64,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<f64>,
}

impl BoundsRecord {
    pub fn new(id: i64, x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            id,
            x,
            y,
            w,
            h,
            extra: Vec::new(),
        }
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    /// Every field except `id`, in file order.
    pub fn shape(&self) -> impl Iterator<Item = f64> + '_ {
        [self.x, self.y, self.w, self.h]
            .into_iter()
            .chain(self.extra.iter().copied())
    }

    pub fn parse_line(line: &str, line_no: usize) -> Result<Self> {
        let fields: Vec<&str> = line
            .trim_matches(|c| c == ' ' || c == '\r' || c == '\n')
            .split(FIELD_DELIMITER)
            .collect();
        if fields.len() < MIN_FIELDS {
            return Err(DriftError::MalformedRecord {
                line: line_no,
                reason: format!(
                    "expected at least {} fields, found {}",
                    MIN_FIELDS,
                    fields.len()
                ),
            });
        }
        let id = parse_id(fields[0], line_no)?;
        let mut values = Vec::with_capacity(fields.len() - 1);
        for raw in &fields[1..] {
            values.push(parse_float(raw, line_no)?);
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(DriftError::MalformedRecord {
                line: line_no,
                reason: format!("non-finite value {}", bad),
            });
        }
        let (w, h) = (values[2], values[3]);
        if w < 0.0 || h < 0.0 {
            return Err(DriftError::MalformedRecord {
                line: line_no,
                reason: format!("negative dimension w={} h={}", w, h),
            });
        }
        Ok(Self {
            id,
            x: values[0],
            y: values[1],
            w,
            h,
            extra: values.split_off(4),
        })
    }
}

fn parse_float(raw: &str, line_no: usize) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| DriftError::MalformedRecord {
            line: line_no,
            reason: format!("'{}': {}", raw, e),
        })
}

// Some engine builds print ids through their real-number type ("3.000000").
fn parse_id(raw: &str, line_no: usize) -> Result<i64> {
    if let Ok(id) = raw.trim().parse::<i64>() {
        return Ok(id);
    }
    let value = parse_float(raw, line_no)?;
    if value.is_finite() && value.fract() == 0.0 {
        Ok(value as i64)
    } else {
        Err(DriftError::MalformedRecord {
            line: line_no,
            reason: format!("id '{}' is not an integer", raw),
        })
    }
}

/// Lazy record iterator over one telemetry source.
///
/// Yields an error for each malformed line and keeps going; callers that want
/// all-or-nothing semantics collect into `Result<Vec<_>>`.
pub struct BoundsReader<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl<R: BufRead> BoundsReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl BoundsReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> Iterator for BoundsReader<R> {
    type Item = Result<BoundsRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.starts_with(COMMENT_MARKER) || line.trim().is_empty() {
                continue;
            }
            return Some(BoundsRecord::parse_line(&line, self.line_no));
        }
    }
}

pub fn read_snapshot(path: &Path) -> Result<Vec<BoundsRecord>> {
    BoundsReader::open(path)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(text: &str) -> Result<Vec<BoundsRecord>> {
        BoundsReader::new(text.as_bytes()).collect()
    }

    #[test]
    fn skips_comments_and_reads_extra_columns() {
        let records = collect("# id\tx\ty\tw\th\n1\t0\t0\t2\t2\n2\t0.5\t0.25\t1\t1\t7\n")
            .expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], BoundsRecord::new(1, 0.0, 0.0, 2.0, 2.0));
        assert_eq!(records[1].extra, vec![7.0]);
        assert_eq!(records[1].y, 0.25);
    }

    #[test]
    fn tolerates_crlf_and_float_ids() {
        let records = collect("3.000000\t1\t2\t3\t4\r\n").expect("parse");
        assert_eq!(records[0].id, 3);
        assert_eq!(records[0].h, 4.0);
    }

    #[test]
    fn short_line_is_malformed() {
        let err = collect("1\t2\t3\n").expect_err("too few fields");
        match err {
            DriftError::MalformedRecord { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn negative_dimension_is_rejected_not_clamped() {
        let err = collect("# c\n1\t0\t0\t-1\t2\n").expect_err("negative width");
        match err {
            DriftError::MalformedRecord { line, reason } => {
                assert_eq!(line, 2);
                assert!(reason.contains("negative"), "{}", reason);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn nan_and_infinite_fields_are_malformed() {
        let text = "1\t0\t0\tnan\t1\n2\t0\t0\t-nan\t1\n3\t0\t0\t1\tNaN\n4\tinf\t0\t1\t1\n";
        let results: Vec<_> = BoundsReader::new(text.as_bytes()).collect();
        assert_eq!(results.len(), 4);
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Err(DriftError::MalformedRecord { line, reason }) => {
                    assert_eq!(line, i + 1);
                    assert!(reason.contains("non-finite"), "{}", reason);
                }
                other => panic!("line {} accepted: {:?}", i + 1, other),
            }
        }
    }

    #[test]
    fn reader_is_lazy_and_reports_per_line() {
        let mut reader = BoundsReader::new("1\t0\t0\t1\t1\nbad\n2\t0\t0\t1\t1\n".as_bytes());
        assert!(reader.next().expect("first").is_ok());
        assert!(reader.next().expect("second").is_err());
        assert_eq!(reader.next().expect("third").expect("ok").id, 2);
        assert!(reader.next().is_none());
    }
}
