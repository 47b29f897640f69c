//! Pipeline producers: data files and database cursors.

use std::path::PathBuf;
use std::sync::Arc;

use batch_config::shared::CompressionMode;
use futures::StreamExt;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::bail;
use crate::cipher::FieldCipher;
use crate::concurrency::pipeline::Publisher;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{BatchResult, ErrorKind};
use crate::file::{DataFileReader, LineSplitter};
use crate::metrics::{BATCH_ROWS_PUBLISHED_TOTAL, TABLE_NAME_LABEL};
use crate::source::Connection;
use crate::stats::{DebugInfo, FileReaderStat};
use crate::types::{RowEvent, is_null};

/// Lines read from a file per blocking read.
const READ_CHUNK_LINES: usize = 1024;

/// Outcome of a producer that reached the end of its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerReport {
    pub worker_id: usize,
    pub rows: u64,
}

/// One data file read by a [`FileProducer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInput {
    /// Index of the file in the command, carried by every event read from it.
    pub source: usize,
    pub path: PathBuf,
}

impl FileInput {
    pub fn new(source: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            path: path.into(),
        }
    }
}

/// Reads data files one after the other and publishes a [`RowEvent`] per non-empty line.
pub struct FileProducer {
    worker_id: usize,
    inputs: Vec<FileInput>,
    compression: CompressionMode,
    splitter: LineSplitter,
    cipher: Option<Arc<FieldCipher>>,
    skip_header: bool,
    table: String,
    publisher: Publisher<RowEvent>,
    debug_info: Arc<DebugInfo>,
    shutdown_rx: ShutdownRx,
}

impl FileProducer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: usize,
        inputs: Vec<FileInput>,
        compression: CompressionMode,
        splitter: LineSplitter,
        skip_header: bool,
        table: impl Into<String>,
        publisher: Publisher<RowEvent>,
        debug_info: Arc<DebugInfo>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            worker_id,
            inputs,
            compression,
            splitter,
            cipher: None,
            skip_header,
            table: table.into(),
            publisher,
            debug_info,
            shutdown_rx,
        }
    }

    /// Decrypts every non-`NULL` field with `cipher` before it is published.
    pub fn with_cipher(mut self, cipher: Option<Arc<FieldCipher>>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Publishes every row of every input. Dropping the producer releases its publisher.
    pub async fn run(mut self) -> BatchResult<ProducerReport> {
        let mut rows = 0;
        for input in std::mem::take(&mut self.inputs) {
            rows += self.read_file(&input).await?;
        }

        counter!(
            BATCH_ROWS_PUBLISHED_TOTAL,
            TABLE_NAME_LABEL => self.table.clone(),
        )
        .increment(rows);

        Ok(ProducerReport {
            worker_id: self.worker_id,
            rows,
        })
    }

    async fn read_file(&mut self, input: &FileInput) -> BatchResult<u64> {
        let path = &input.path;
        let mut reader = DataFileReader::open(path, self.compression).await?;
        let mut rows = 0u64;
        let mut line_number = 0u64;
        let mut header_pending = self.skip_header;

        info!(source = input.source, path = %path.display(), "reading data file");

        loop {
            if self.shutdown_rx.is_shutdown() {
                bail!(
                    ErrorKind::OperationCancelled,
                    "File producer stopped by shutdown",
                    path.display()
                );
            }

            let lines = reader.next_lines(READ_CHUNK_LINES).await?;
            if lines.is_empty() {
                break;
            }

            for line in lines {
                line_number += 1;
                if std::mem::take(&mut header_pending) || line.is_empty() {
                    continue;
                }

                let fields = match self
                    .splitter
                    .split(&line)
                    .and_then(|fields| self.decrypt(fields))
                {
                    Ok(fields) => fields,
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            line = line_number,
                            error = %err,
                            "malformed data line"
                        );
                        return Err(err);
                    }
                };

                self.debug_info.row_published();
                self.publisher
                    .publish(RowEvent::new(fields, input.source))
                    .await?;
                rows += 1;
            }
        }

        self.debug_info
            .add_file_stat(FileReaderStat::new(path.display().to_string(), rows));
        info!(source = input.source, path = %path.display(), rows, "data file read");

        Ok(rows)
    }

    fn decrypt(&self, fields: Vec<String>) -> BatchResult<Vec<String>> {
        let Some(cipher) = &self.cipher else {
            return Ok(fields);
        };

        fields
            .into_iter()
            .map(|field| -> BatchResult<String> {
                if is_null(&field) {
                    return Ok(field);
                }

                match String::from_utf8(cipher.decrypt(&field)?) {
                    Ok(plain) => Ok(plain),
                    Err(_) => bail!(
                        ErrorKind::EncryptionError,
                        "Decrypted value is not valid UTF-8"
                    ),
                }
            })
            .collect()
    }
}

/// Streams a query result into the pipeline, one [`RowEvent`] per row.
pub struct CursorProducer<C> {
    source: usize,
    conn: C,
    sql: String,
    table: String,
    publisher: Publisher<RowEvent>,
    debug_info: Arc<DebugInfo>,
    shutdown_rx: ShutdownRx,
}

impl<C> CursorProducer<C>
where
    C: Connection,
{
    pub fn new(
        source: usize,
        conn: C,
        sql: impl Into<String>,
        table: impl Into<String>,
        publisher: Publisher<RowEvent>,
        debug_info: Arc<DebugInfo>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            source,
            conn,
            sql: sql.into(),
            table: table.into(),
            publisher,
            debug_info,
            shutdown_rx,
        }
    }

    /// Publishes every row of the query, then returns the connection.
    pub async fn run(mut self) -> BatchResult<ProducerReport> {
        let result = self.stream().await;

        drop(self.publisher);
        if let Err(err) = self.conn.close().await {
            warn!(source = self.source, error = %err, "failed to close producer connection");
        }

        result
    }

    async fn stream(&mut self) -> BatchResult<ProducerReport> {
        debug!(source = self.source, sql = %self.sql, "streaming query into pipeline");

        let mut rows = 0u64;
        let mut stream = self.conn.fetch_rows(&self.sql);
        while let Some(row) = stream.next().await {
            if self.shutdown_rx.is_shutdown() {
                bail!(
                    ErrorKind::OperationCancelled,
                    "Cursor producer stopped by shutdown",
                    format!("source {}", self.source)
                );
            }

            let event = RowEvent::from_nullable(row?.into_values(), self.source);
            self.debug_info.row_published();
            self.publisher.publish(event).await?;
            rows += 1;
        }

        counter!(
            BATCH_ROWS_PUBLISHED_TOTAL,
            TABLE_NAME_LABEL => self.table.clone(),
        )
        .increment(rows);
        info!(source = self.source, rows, "query streamed");

        Ok(ProducerReport {
            worker_id: self.source,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use batch_config::shared::ProducerMode;
    use secrecy::SecretString;

    use super::*;
    use crate::concurrency::pipeline::EventPipeline;
    use crate::concurrency::shutdown::create_shutdown_channel;

    fn data_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn files_are_published_in_order() {
        let first = data_file("id,name\n1,a\n\n2,\"b,c\"\n");
        let second = data_file("id,name\n3,d\n");
        let pipeline = EventPipeline::new(16, ProducerMode::Single).unwrap();
        let subscriber = pipeline.subscribe();
        let debug_info = DebugInfo::new();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let producer = FileProducer::new(
            0,
            vec![
                FileInput::new(0, first.path()),
                FileInput::new(1, second.path()),
            ],
            CompressionMode::None,
            LineSplitter::new(",", false),
            true,
            "t",
            pipeline.publisher().unwrap(),
            debug_info.clone(),
            shutdown_rx,
        );

        let report = producer.run().await.unwrap();
        assert_eq!(report.rows, 3);

        let mut events = Vec::new();
        while let Some(event) = subscriber.claim().await {
            events.push((event.source, event.fields));
        }
        assert_eq!(
            events,
            vec![
                (0, vec!["1".to_string(), "a".to_string()]),
                (0, vec!["2".to_string(), "b,c".to_string()]),
                (1, vec!["3".to_string(), "d".to_string()]),
            ]
        );
        assert_eq!(debug_info.remaining_rows(), 3);
        assert_eq!(
            debug_info.file_stats().iter().map(FileReaderStat::rows).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[tokio::test]
    async fn encrypted_fields_are_decrypted_before_publishing() {
        let cipher = Arc::new(FieldCipher::caesar(&SecretString::new("key".to_string())));
        let line = format!(
            "{},{},\\N\n",
            cipher.encrypt(b"1").unwrap(),
            cipher.encrypt("a,\"b\"".as_bytes()).unwrap()
        );
        let file = data_file(&line);
        let pipeline = EventPipeline::new(4, ProducerMode::Single).unwrap();
        let subscriber = pipeline.subscribe();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let producer = FileProducer::new(
            0,
            vec![FileInput::new(0, file.path())],
            CompressionMode::None,
            LineSplitter::new(",", false),
            false,
            "t",
            pipeline.publisher().unwrap(),
            DebugInfo::new(),
            shutdown_rx,
        )
        .with_cipher(Some(cipher));

        producer.run().await.unwrap();
        let event = subscriber.claim().await.unwrap();
        assert_eq!(
            event.fields,
            vec!["1".to_string(), "a,\"b\"".to_string(), "\\N".to_string()]
        );
    }

    #[tokio::test]
    async fn plaintext_under_a_cipher_is_rejected() {
        let file = data_file("not base64!\n");
        let pipeline = EventPipeline::<RowEvent>::new(4, ProducerMode::Single).unwrap();
        let _subscriber = pipeline.subscribe();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let producer = FileProducer::new(
            0,
            vec![FileInput::new(0, file.path())],
            CompressionMode::None,
            LineSplitter::new(",", false),
            false,
            "t",
            pipeline.publisher().unwrap(),
            DebugInfo::new(),
            shutdown_rx,
        )
        .with_cipher(Some(Arc::new(FieldCipher::caesar(&SecretString::new(
            "key".to_string(),
        )))));

        let err = producer.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncryptionError);
    }

    #[tokio::test]
    async fn malformed_line_stops_the_producer() {
        let file = data_file("1,\"open\n");
        let pipeline = EventPipeline::<RowEvent>::new(4, ProducerMode::Single).unwrap();
        let _subscriber = pipeline.subscribe();
        let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let producer = FileProducer::new(
            0,
            vec![FileInput::new(0, file.path())],
            CompressionMode::None,
            LineSplitter::new(",", false),
            false,
            "t",
            pipeline.publisher().unwrap(),
            DebugInfo::new(),
            shutdown_rx,
        );

        let err = producer.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
