//! Delimited-text connector.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;

use loadstone_types::field::Field;
use loadstone_types::record::{DataRecord, ErrorRecord, Record};
use loadstone_types::value::ExternalValue;

use crate::opener::{enumerate_resources, ResourceOpener};
use crate::{Connector, RecordSink, RECORD_CHANNEL_CAPACITY};

fn default_delimiter() -> char {
    ','
}

fn default_quote() -> char {
    '"'
}

fn default_header() -> bool {
    true
}

fn default_max_concurrent_files() -> usize {
    4
}

/// The `connector.csv` settings subtree.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsvSettings {
    pub url: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_quote")]
    pub quote: char,
    #[serde(default = "default_header")]
    pub header: bool,
    #[serde(default)]
    pub skip_records: u64,
    #[serde(default)]
    pub max_records: Option<u64>,
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
}

/// Reads and writes delimited text through the `csv` crate.
pub struct CsvConnector {
    opener: Arc<dyn ResourceOpener>,
    settings: Option<CsvSettings>,
    resources: Vec<String>,
    read_mode: bool,
}

impl CsvConnector {
    pub fn new(opener: Arc<dyn ResourceOpener>) -> Self {
        Self {
            opener,
            settings: None,
            resources: Vec::new(),
            read_mode: true,
        }
    }

    fn settings(&self) -> anyhow::Result<&CsvSettings> {
        self.settings
            .as_ref()
            .context("csv connector not configured")
    }
}

#[async_trait]
impl Connector for CsvConnector {
    fn configure(&mut self, settings: &serde_json::Value, read: bool) -> anyhow::Result<()> {
        let parsed: CsvSettings =
            serde_json::from_value(settings.clone()).context("invalid connector.csv settings")?;
        anyhow::ensure!(parsed.delimiter.is_ascii(), "delimiter must be ASCII");
        anyhow::ensure!(parsed.quote.is_ascii(), "quote must be ASCII");
        anyhow::ensure!(
            parsed.max_concurrent_files >= 1,
            "max_concurrent_files must be at least 1"
        );
        self.settings = Some(parsed);
        self.read_mode = read;
        Ok(())
    }

    async fn init(&mut self) -> anyhow::Result<()> {
        let settings = self.settings()?.clone();
        if self.read_mode {
            self.resources = enumerate_resources(&settings.url, "csv")?;
            tracing::debug!(files = self.resources.len(), "csv connector initialized");
        }
        Ok(())
    }

    fn read(&self) -> anyhow::Result<mpsc::Receiver<Record>> {
        let settings = self.settings()?.clone();
        let resources = self.resources.clone();
        anyhow::ensure!(!resources.is_empty(), "no input files under {}", settings.url);

        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let opener = Arc::clone(&self.opener);
        tokio::spawn(async move {
            let limit = Arc::new(Semaphore::new(settings.max_concurrent_files));
            let mut workers = tokio::task::JoinSet::new();
            for url in resources {
                let permit = match Arc::clone(&limit).acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                let tx = tx.clone();
                let opener = Arc::clone(&opener);
                let settings = settings.clone();
                workers.spawn_blocking(move || {
                    let _permit = permit;
                    if let Err(error) = read_resource(&*opener, &url, &settings, &tx) {
                        tracing::warn!(resource = url, error = %error, "csv read failed");
                        // The resource-level failure is surfaced as an
                        // error record at position 1.
                        let record = ErrorRecord::new(Arc::from(url.as_str()), 1, String::new(), error);
                        let _ = tx.blocking_send(Record::Error(record));
                    }
                });
            }
            while workers.join_next().await.is_some() {}
        });
        Ok(rx)
    }

    fn write(&self) -> anyhow::Result<Box<dyn RecordSink>> {
        let settings = self.settings()?.clone();
        let writer = self.opener.open_write(&settings.url)?;
        let csv_writer = csv::WriterBuilder::new()
            .delimiter(settings.delimiter as u8)
            .quote(settings.quote as u8)
            .from_writer(writer);
        Ok(Box::new(CsvSink {
            writer: Some(csv_writer),
            header: settings.header,
            header_written: false,
        }))
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.resources.clear();
        Ok(())
    }
}

fn read_resource(
    opener: &dyn ResourceOpener,
    url: &str,
    settings: &CsvSettings,
    tx: &mpsc::Sender<Record>,
) -> anyhow::Result<()> {
    let reader = opener.open_read(url)?;
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(settings.delimiter as u8)
        .quote(settings.quote as u8)
        .has_headers(settings.header)
        .flexible(true)
        .from_reader(reader);

    let headers: Option<Vec<String>> = if settings.header {
        Some(
            csv_reader
                .headers()
                .context("cannot read header row")?
                .iter()
                .map(str::to_string)
                .collect(),
        )
    } else {
        None
    };

    let resource: Arc<str> = Arc::from(url);
    let mut position = 0u64;
    let mut emitted = 0u64;
    for row in csv_reader.records() {
        position += 1;
        if position <= settings.skip_records {
            continue;
        }
        if let Some(max) = settings.max_records {
            if emitted >= max {
                break;
            }
        }
        let record = match row {
            Ok(row) => {
                let source = join_source(&row, settings.delimiter);
                let fields = row
                    .iter()
                    .enumerate()
                    .map(|(i, value)| {
                        let field = match &headers {
                            Some(names) if i < names.len() => Field::Name(names[i].clone()),
                            _ => Field::Index(i),
                        };
                        (field, ExternalValue::Text(value.to_string()))
                    })
                    .collect();
                Record::Data(DataRecord::new(
                    Arc::clone(&resource),
                    position,
                    source,
                    fields,
                ))
            }
            Err(error) => Record::Error(ErrorRecord::new(
                Arc::clone(&resource),
                position,
                String::new(),
                anyhow::Error::new(error).context("malformed csv row"),
            )),
        };
        emitted += 1;
        if tx.blocking_send(record).is_err() {
            // Downstream cancelled.
            return Ok(());
        }
    }
    tracing::debug!(resource = url, records = emitted, "csv resource drained");
    Ok(())
}

fn join_source(row: &csv::StringRecord, delimiter: char) -> String {
    let mut out = String::new();
    for (i, value) in row.iter().enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        out.push_str(value);
    }
    out
}

struct CsvSink {
    writer: Option<csv::Writer<Box<dyn std::io::Write + Send>>>,
    header: bool,
    header_written: bool,
}

#[async_trait]
impl RecordSink for CsvSink {
    async fn send(&mut self, record: DataRecord) -> anyhow::Result<()> {
        let writer = self.writer.as_mut().context("csv sink already closed")?;
        if self.header && !self.header_written {
            let names: Vec<String> = record
                .fields()
                .iter()
                .map(|(field, _)| field.to_string())
                .collect();
            writer.write_record(&names).context("cannot write header")?;
            self.header_written = true;
        }
        let values: Vec<String> = record
            .fields()
            .iter()
            .map(|(_, value)| value.to_string())
            .collect();
        writer
            .write_record(&values)
            .with_context(|| format!("cannot write record {}", record.position()))?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().context("cannot flush csv output")?;
        }
        Ok(())
    }
}
