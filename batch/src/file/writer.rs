use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use batch_config::shared::CompressionMode;
use flate2::Compression;
use flate2::write::GzEncoder;
use metrics::counter;
use tracing::debug;

use crate::batch_error;
use crate::error::{BatchResult, ErrorKind};
use crate::file::run_blocking;
use crate::metrics::{BATCH_FILES_WRITTEN_TOTAL, TABLE_NAME_LABEL};
use crate::stats::FileReaderStat;

/// Bytes buffered in memory before they are handed to the blocking pool.
const WRITE_CHUNK_BYTES: usize = 256 * 1024;

/// Where export files go and how they are named.
///
/// Files are named `{dir}{prefix}{table}_{index}`, with `-{seq}` appended when output rolls over
/// several files, and the compression suffix last.
#[derive(Debug, Clone)]
pub struct FileTarget {
    pub dir: String,
    pub prefix: String,
    pub table: String,
    pub index: usize,
    pub compression: CompressionMode,
}

impl FileTarget {
    pub fn file_path(&self, seq: Option<usize>) -> PathBuf {
        let mut name = format!("{}{}{}_{}", self.dir, self.prefix, self.table, self.index);
        if let Some(seq) = seq {
            name.push_str(&format!("-{seq}"));
        }
        name.push_str(self.compression.extension_suffix());
        PathBuf::from(name)
    }
}

enum FileSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FileSink {
    fn create(path: &PathBuf, compression: CompressionMode) -> BatchResult<Self> {
        let file = File::create(path).map_err(|err| {
            batch_error!(
                ErrorKind::IoError,
                "Could not create export file",
                format!("{}: {err}", path.display()),
                source: err
            )
        })?;
        let writer = BufWriter::new(file);

        Ok(match compression {
            CompressionMode::None => FileSink::Plain(writer),
            CompressionMode::Gzip => FileSink::Gzip(GzEncoder::new(writer, Compression::default())),
        })
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            FileSink::Plain(writer) => writer.write_all(bytes),
            FileSink::Gzip(encoder) => encoder.write_all(bytes),
        }
    }

    fn finish(self) -> std::io::Result<()> {
        let mut writer = match self {
            FileSink::Plain(writer) => writer,
            FileSink::Gzip(encoder) => encoder.finish()?,
        };
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

struct OpenFile {
    sink: FileSink,
    path: PathBuf,
    rows: u64,
}

/// Writes export rows into one file, or a sequence of files capped at `max_rows` rows each.
///
/// At least one file is produced, even for an empty result, so every export yields a file with
/// its header.
pub struct ExportFileWriter {
    target: FileTarget,
    header: Option<Vec<u8>>,
    max_rows: Option<u64>,
    current: Option<OpenFile>,
    pending: Vec<u8>,
    next_seq: usize,
    finished: Vec<FileReaderStat>,
}

impl ExportFileWriter {
    /// `max_rows` enables rolling; a limit of zero is treated as no limit.
    pub fn new(target: FileTarget, header: Option<Vec<u8>>, max_rows: Option<u64>) -> Self {
        Self {
            target,
            header,
            max_rows: max_rows.filter(|limit| *limit > 0),
            current: None,
            pending: Vec::with_capacity(WRITE_CHUNK_BYTES),
            next_seq: 0,
            finished: Vec::new(),
        }
    }

    /// Appends one formatted line, rolling to the next file first when the current one is full.
    pub async fn write_row(&mut self, line: &[u8]) -> BatchResult<()> {
        let full = match (&self.current, self.max_rows) {
            (Some(current), Some(limit)) => current.rows >= limit,
            _ => false,
        };
        if full {
            self.close_current().await?;
        }
        if self.current.is_none() {
            self.open_next().await?;
        }

        self.pending.extend_from_slice(line);
        if let Some(current) = self.current.as_mut() {
            current.rows += 1;
        }

        if self.pending.len() >= WRITE_CHUNK_BYTES {
            self.flush_pending().await?;
        }

        Ok(())
    }

    /// Appends several lines that belong to the same file.
    ///
    /// Only valid without rolling; use [`ExportFileWriter::write_row`] otherwise.
    pub async fn write_chunk(&mut self, bytes: &[u8], rows: u64) -> BatchResult<()> {
        if self.max_rows.is_some() {
            return Err(batch_error!(
                ErrorKind::InvalidState,
                "Chunked writes cannot roll files"
            ));
        }
        if self.current.is_none() {
            self.open_next().await?;
        }

        self.pending.extend_from_slice(bytes);
        if let Some(current) = self.current.as_mut() {
            current.rows += rows;
        }

        if self.pending.len() >= WRITE_CHUNK_BYTES {
            self.flush_pending().await?;
        }

        Ok(())
    }

    /// Flushes and closes the open file and returns per-file row counts.
    pub async fn finish(mut self) -> BatchResult<Vec<FileReaderStat>> {
        if self.current.is_none() && self.finished.is_empty() {
            self.open_next().await?;
        }
        self.close_current().await?;

        Ok(self.finished)
    }

    async fn open_next(&mut self) -> BatchResult<()> {
        let seq = self.max_rows.map(|_| self.next_seq);
        self.next_seq += 1;

        let path = self.target.file_path(seq);
        let compression = self.target.compression;
        let open_path = path.clone();
        let sink = run_blocking(move || FileSink::create(&open_path, compression)).await?;

        debug!(path = %path.display(), "opened export file");
        counter!(
            BATCH_FILES_WRITTEN_TOTAL,
            TABLE_NAME_LABEL => self.target.table.clone(),
        )
        .increment(1);

        self.current = Some(OpenFile {
            sink,
            path,
            rows: 0,
        });
        if let Some(header) = &self.header {
            self.pending.extend_from_slice(header);
        }

        Ok(())
    }

    async fn flush_pending(&mut self) -> BatchResult<()> {
        let Some(mut current) = self.current.take() else {
            return Ok(());
        };
        let bytes = std::mem::take(&mut self.pending);

        let (current, mut bytes) = run_blocking(move || {
            current.sink.write_all(&bytes)?;
            Ok((current, bytes))
        })
        .await?;

        bytes.clear();
        self.pending = bytes;
        self.current = Some(current);

        Ok(())
    }

    async fn close_current(&mut self) -> BatchResult<()> {
        self.flush_pending().await?;

        let Some(current) = self.current.take() else {
            return Ok(());
        };

        let OpenFile { sink, path, rows } = current;
        run_blocking(move || Ok(sink.finish()?)).await?;

        debug!(path = %path.display(), rows, "closed export file");
        self.finished
            .push(FileReaderStat::new(path.display().to_string(), rows));

        Ok(())
    }
}
