use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow_array::{RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tenderflow_core::TenderRecord;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

pub const JSON_FILE: &str = "tenders.json";
pub const PARQUET_FILE: &str = "tenders.parquet";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Parquet,
}

impl std::str::FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "parquet" => Ok(Self::Parquet),
            other => bail!("unknown export format {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub export_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
    pub files: Vec<ExportManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes the requested formats into `dir` and a `manifest.json` describing them.
pub async fn export_tenders(
    dir: &Path,
    records: &[TenderRecord],
    formats: &[ExportFormat],
) -> Result<ExportManifest> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let mut files = Vec::new();
    if formats.contains(&ExportFormat::Json) {
        let path = dir.join(JSON_FILE);
        let bytes = serde_json::to_vec_pretty(records).context("serializing tenders")?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        files.push(manifest_entry("tenders_json", dir, &path)?);
    }
    if formats.contains(&ExportFormat::Parquet) {
        let path = dir.join(PARQUET_FILE);
        write_tenders_parquet(&path, records)?;
        files.push(manifest_entry("tenders_parquet", dir, &path)?);
    }

    let manifest = ExportManifest {
        schema_version: 1,
        export_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        record_count: records.len(),
        files,
    };
    let manifest_path = dir.join(MANIFEST_FILE);
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing export manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    info!(dir = %dir.display(), records = records.len(), files = manifest.files.len(), "tenders exported");
    Ok(manifest)
}

fn write_tenders_parquet(path: &Path, records: &[TenderRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("platform_id", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("deadline", DataType::Utf8, true),
        ArrowField::new("value", DataType::Utf8, true),
        ArrowField::new("currency", DataType::Utf8, true),
        ArrowField::new("category", DataType::Utf8, true),
        ArrowField::new("authority", DataType::Utf8, true),
        ArrowField::new("url", DataType::Utf8, true),
        ArrowField::new("cpv_codes", DataType::Utf8, false),
        ArrowField::new("extracted_at", DataType::Utf8, false),
    ]));

    let required = |f: fn(&TenderRecord) -> &str| {
        StringArray::from(records.iter().map(|r| Some(f(r))).collect::<Vec<_>>())
    };
    let optional = |f: fn(&TenderRecord) -> Option<&str>| {
        StringArray::from(records.iter().map(f).collect::<Vec<_>>())
    };
    let cpv_codes = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.cpv_codes.join(";")))
            .collect::<Vec<_>>(),
    );
    let extracted_at = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.extracted_at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(required(|r| r.platform_id.as_str())),
            Arc::new(required(|r| r.title.as_str())),
            Arc::new(optional(|r| r.deadline.as_deref())),
            Arc::new(optional(|r| r.value.as_deref())),
            Arc::new(optional(|r| r.currency.as_deref())),
            Arc::new(optional(|r| r.category.as_deref())),
            Arc::new(optional(|r| r.authority.as_deref())),
            Arc::new(optional(|r| r.url.as_deref())),
            Arc::new(cpv_codes),
            Arc::new(extracted_at),
        ],
    )
    .context("building tenders record batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, dir: &Path, path: &Path) -> Result<ExportManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let rel = path.strip_prefix(dir).unwrap_or(path).display().to_string();
    Ok(ExportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderflow_core::ContactInfo;

    fn record(title: &str) -> TenderRecord {
        TenderRecord {
            title: title.into(),
            description: None,
            deadline: Some("2026-11-30".into()),
            value: Some("250000".into()),
            currency: Some("EUR".into()),
            category: Some("IT services".into()),
            cpv_codes: vec!["72000000".into(), "72200000".into()],
            authority: Some("Stadt Wien".into()),
            requirements: Vec::new(),
            contact_info: ContactInfo::default(),
            url: None,
            platform_id: "usp-gv-at".into(),
            extracted_at: Utc::now(),
            raw_excerpt: None,
        }
    }

    #[tokio::test]
    async fn writes_both_formats_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record("Cloud hosting"), record("Helpdesk")];
        let manifest = export_tenders(dir.path(), &records, &[ExportFormat::Json, ExportFormat::Parquet])
            .await
            .unwrap();

        assert_eq!(manifest.record_count, 2);
        let paths: Vec<_> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec![JSON_FILE, PARQUET_FILE]);
        for file in &manifest.files {
            let bytes = std::fs::read(dir.path().join(&file.path)).unwrap();
            assert_eq!(file.bytes, bytes.len() as u64);
            assert_eq!(file.sha256, hex::encode(Sha256::digest(&bytes)));
        }

        let json: Vec<TenderRecord> =
            serde_json::from_slice(&std::fs::read(dir.path().join(JSON_FILE)).unwrap()).unwrap();
        assert_eq!(json, records);

        let on_disk: ExportManifest =
            serde_json::from_slice(&std::fs::read(dir.path().join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk.export_id, manifest.export_id);
    }

    #[tokio::test]
    async fn json_only_skips_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = export_tenders(dir.path(), &[], &[ExportFormat::Json]).await.unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert!(!dir.path().join(PARQUET_FILE).exists());
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("parquet".parse::<ExportFormat>().unwrap(), ExportFormat::Parquet);
        assert!("csv".parse::<ExportFormat>().is_err());
    }
}
