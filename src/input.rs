//! Landmark input: detector results as JSON lines from a file, FIFO or stdin.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    os::unix::fs::FileTypeExt,
    path::Path,
};
use thiserror::Error;

use crate::geometry::Landmark;

/// One detector pass. Faces beyond the first are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectorResult {
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    #[serde(default)]
    pub faces: Vec<Vec<Landmark>>,
}

impl DetectorResult {
    pub fn first_face(&self) -> Option<&[Landmark]> {
        self.faces.first().map(Vec::as_slice)
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: landmark {index} is not finite")]
    NonFinite { line: usize, index: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<DetectorResult>, FrameError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let res: DetectorResult = serde_json::from_str(line).map_err(|source| FrameError::Parse {
        line: line_no,
        source,
    })?;
    if let Some(face) = res.first_face() {
        if let Some(index) = face.iter().position(|l| !(l.x.is_finite() && l.y.is_finite())) {
            return Err(FrameError::NonFinite {
                line: line_no,
                index,
            });
        }
    }
    Ok(Some(res))
}

pub struct LandmarkSource {
    reader: Box<dyn BufRead + Send>,
    line_no: usize,
    buf: String,
}

impl LandmarkSource {
    /// `-` reads stdin; anything else is opened as a path.
    pub fn open(spec: &str) -> Result<Self> {
        if spec == "-" {
            return Ok(Self::from_reader(BufReader::new(io::stdin())));
        }
        let f = File::open(spec).with_context(|| format!("failed to open input {spec}"))?;
        Ok(Self::from_reader(BufReader::new(f)))
    }

    pub fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            line_no: 0,
            buf: String::new(),
        }
    }
}

impl Iterator for LandmarkSource {
    type Item = Result<DetectorResult, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            self.line_no += 1;
            match parse_line(&self.buf, self.line_no) {
                Ok(Some(res)) => return Some(Ok(res)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub path: String,
    pub kind: &'static str,
}

pub fn describe_source(spec: &str) -> SourceInfo {
    let kind = if spec == "-" {
        "stdin"
    } else {
        match Path::new(spec).metadata() {
            Ok(m) if m.file_type().is_fifo() => "fifo",
            Ok(m) if m.is_file() => "file",
            Ok(_) => "other",
            Err(_) => "missing",
        }
    };
    SourceInfo {
        path: spec.to_string(),
        kind,
    }
}
