use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use batch_config::shared::CompressionMode;
use flate2::read::MultiGzDecoder;

use crate::batch_error;
use crate::error::{BatchResult, ErrorKind};
use crate::file::run_blocking;

/// Reads a data file in chunks of lines.
///
/// Line terminators (`\n` or `\r\n`) are stripped.
pub struct DataFileReader {
    path: PathBuf,
    reader: Option<Box<dyn BufRead + Send>>,
}

impl DataFileReader {
    /// Opens `path`, decompressing on the fly for [`CompressionMode::Gzip`].
    pub async fn open(path: impl AsRef<Path>, compression: CompressionMode) -> BatchResult<Self> {
        let path = path.as_ref().to_path_buf();
        let open_path = path.clone();

        let reader = run_blocking(move || {
            let file = File::open(&open_path).map_err(|err| {
                batch_error!(
                    ErrorKind::IoError,
                    "Could not open data file",
                    format!("{}: {err}", open_path.display()),
                    source: err
                )
            })?;

            let reader: Box<dyn BufRead + Send> = match compression {
                CompressionMode::None => Box::new(BufReader::new(file)),
                CompressionMode::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
            };
            Ok(reader)
        })
        .await?;

        Ok(Self {
            path,
            reader: Some(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads up to `max_lines` lines. An empty result means end of file.
    pub async fn next_lines(&mut self, max_lines: usize) -> BatchResult<Vec<String>> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(Vec::new());
        };

        let (reader, lines) = run_blocking(move || {
            let mut lines = Vec::with_capacity(max_lines);
            let mut line = String::new();
            while lines.len() < max_lines {
                line.clear();
                if reader.read_line(&mut line)? == 0 {
                    break;
                }

                let trimmed = line
                    .strip_suffix('\n')
                    .map(|l| l.strip_suffix('\r').unwrap_or(l))
                    .unwrap_or(&line);
                lines.push(trimmed.to_string());
            }
            Ok((reader, lines))
        })
        .await?;

        if !lines.is_empty() {
            self.reader = Some(reader);
        }

        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[tokio::test]
    async fn reads_plain_lines_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        std::fs::write(&path, "1,a\r\n2,b\n3,c").unwrap();

        let mut reader = DataFileReader::open(&path, CompressionMode::None)
            .await
            .unwrap();

        assert_eq!(reader.next_lines(2).await.unwrap(), vec!["1,a", "2,b"]);
        assert_eq!(reader.next_lines(2).await.unwrap(), vec!["3,c"]);
        assert!(reader.next_lines(2).await.unwrap().is_empty());
        assert!(reader.next_lines(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reads_gzip_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"1,a\n2,b\n").unwrap();
        encoder.finish().unwrap();

        let mut reader = DataFileReader::open(&path, CompressionMode::Gzip)
            .await
            .unwrap();

        assert_eq!(reader.next_lines(10).await.unwrap(), vec!["1,a", "2,b"]);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = DataFileReader::open("/definitely/not/here.csv", CompressionMode::None)
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::IoError);
    }
}
