//! Per-thread vector file naming and record writing

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use slicepoint_common::{Legacy, ProfileKind, Record};

use crate::domain::{Pid, ProfilerError, ThreadId};

/// `<prefix>.T.<tid>.<ext>`, or `<prefix>.T.<pid>.<tid>.<ext>` with a pid
#[must_use]
pub fn vector_file_name(prefix: &Path, tid: ThreadId, pid: Option<Pid>, kind: ProfileKind) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    match pid {
        Some(pid) => name.push(format!(".T.{}.{}.{}", pid.0, tid.0, kind.extension())),
        None => name.push(format!(".T.{}.{}", tid.0, kind.extension())),
    }
    PathBuf::from(name)
}

/// Buffered record sink for one profile of one thread
pub struct VectorWriter {
    path: PathBuf,
    out: BufWriter<File>,
    legacy: bool,
}

impl VectorWriter {
    /// Create (truncate) the vector file at `path`
    ///
    /// # Errors
    /// Returns [`ProfilerError::OutputOpenFailed`] if the file cannot be created
    pub fn create(path: PathBuf, legacy: bool) -> Result<Self, ProfilerError> {
        let file = File::create(&path)
            .map_err(|source| ProfilerError::OutputOpenFailed { path: path.clone(), source })?;
        Ok(Self { path, out: BufWriter::new(file), legacy })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one record followed by the newline sentinel
    ///
    /// The legacy layout only carries markers and vectors; other records are
    /// dropped.
    ///
    /// # Errors
    /// Returns an error if the underlying write fails
    pub fn record(&mut self, record: &Record) -> std::io::Result<()> {
        if !self.legacy {
            return writeln!(self.out, "{record}");
        }
        match record {
            Record::Marker { .. } | Record::Vector(_) => writeln!(self.out, "{}", Legacy(record)),
            _ => Ok(()),
        }
    }

    /// # Errors
    /// Returns an error if the buffered data cannot be written
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}
