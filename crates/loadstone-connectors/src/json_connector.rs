//! Line-delimited JSON connector.

use std::io::{BufRead, BufReader, Write};
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

fn default_max_concurrent_files() -> usize {
    4
}

/// The `connector.json` settings subtree.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonSettings {
    pub url: String,
    #[serde(default)]
    pub skip_records: u64,
    #[serde(default)]
    pub max_records: Option<u64>,
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
}

/// Reads and writes one JSON object per line.
pub struct JsonConnector {
    opener: Arc<dyn ResourceOpener>,
    settings: Option<JsonSettings>,
    resources: Vec<String>,
    read_mode: bool,
}

impl JsonConnector {
    pub fn new(opener: Arc<dyn ResourceOpener>) -> Self {
        Self {
            opener,
            settings: None,
            resources: Vec::new(),
            read_mode: true,
        }
    }

    fn settings(&self) -> anyhow::Result<&JsonSettings> {
        self.settings
            .as_ref()
            .context("json connector not configured")
    }
}

#[async_trait]
impl Connector for JsonConnector {
    fn configure(&mut self, settings: &serde_json::Value, read: bool) -> anyhow::Result<()> {
        let parsed: JsonSettings =
            serde_json::from_value(settings.clone()).context("invalid connector.json settings")?;
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
            self.resources = enumerate_resources(&settings.url, "json")?;
            tracing::debug!(files = self.resources.len(), "json connector initialized");
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
                        tracing::warn!(resource = url, error = %error, "json read failed");
                        let record =
                            ErrorRecord::new(Arc::from(url.as_str()), 1, String::new(), error);
                        let _ = tx.blocking_send(Record::Error(record));
                    }
                });
            }
            while workers.join_next().await.is_some() {}
        });
        Ok(rx)
    }

    fn write(&self) -> anyhow::Result<Box<dyn RecordSink>> {
        let settings = self.settings()?;
        let writer = self.opener.open_write(&settings.url)?;
        Ok(Box::new(JsonSink {
            writer: Some(writer),
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
    settings: &JsonSettings,
    tx: &mpsc::Sender<Record>,
) -> anyhow::Result<()> {
    let reader = BufReader::new(opener.open_read(url)?);
    let resource: Arc<str> = Arc::from(url);
    let mut position = 0u64;
    let mut emitted = 0u64;
    for line in reader.lines() {
        let line = line.with_context(|| format!("cannot read {url}"))?;
        if line.trim().is_empty() {
            continue;
        }
        position += 1;
        if position <= settings.skip_records {
            continue;
        }
        if let Some(max) = settings.max_records {
            if emitted >= max {
                break;
            }
        }
        let record = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(serde_json::Value::Object(object)) => {
                let fields = object
                    .into_iter()
                    .map(|(name, value)| (Field::Name(name), ExternalValue::Json(value)))
                    .collect();
                Record::Data(DataRecord::new(
                    Arc::clone(&resource),
                    position,
                    line.clone(),
                    fields,
                ))
            }
            Ok(other) => Record::Error(ErrorRecord::new(
                Arc::clone(&resource),
                position,
                line.clone(),
                anyhow::anyhow!("expected a JSON object, got: {other}"),
            )),
            Err(error) => Record::Error(ErrorRecord::new(
                Arc::clone(&resource),
                position,
                line.clone(),
                anyhow::Error::new(error).context("malformed json line"),
            )),
        };
        emitted += 1;
        if tx.blocking_send(record).is_err() {
            return Ok(());
        }
    }
    tracing::debug!(resource = url, records = emitted, "json resource drained");
    Ok(())
}

struct JsonSink {
    writer: Option<Box<dyn Write + Send>>,
}

#[async_trait]
impl RecordSink for JsonSink {
    async fn send(&mut self, record: DataRecord) -> anyhow::Result<()> {
        let writer = self.writer.as_mut().context("json sink already closed")?;
        let mut object = serde_json::Map::new();
        for (field, value) in record.fields() {
            let json = match value {
                ExternalValue::Json(v) => v.clone(),
                ExternalValue::Text(s) => serde_json::Value::String(s.clone()),
                ExternalValue::Null => serde_json::Value::Null,
            };
            object.insert(field.to_string(), json);
        }
        serde_json::to_writer(&mut *writer, &serde_json::Value::Object(object))
            .with_context(|| format!("cannot write record {}", record.position()))?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().context("cannot flush json output")?;
        }
        Ok(())
    }
}
