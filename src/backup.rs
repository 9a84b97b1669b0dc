use crate::db::DB_FILE_NAME;
use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/schoold.sqlite3";
pub const BUNDLE_FORMAT: &str = "schoold-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "sqlite3";

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub db_sha256: String,
    pub db_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Writes `manifest.json` plus the workspace database into a zip bundle.
/// The caller checkpoints the WAL first so the file on disk is complete.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    hasher.update(&db_bytes);
    let db_sha256 = hex_digest(hasher);

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "dbSha256": db_sha256,
        "dbBytes": db_bytes.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        db_sha256,
        db_bytes: db_bytes.len() as u64,
    })
}

/// Replaces the workspace database with the one in `in_path`.
///
/// Accepts either a bundle written by [`export_workspace_bundle`] or a bare
/// SQLite file. Bundles are checked against the manifest digest before the
/// existing database is touched.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE_NAME);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE_NAME));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let detected = match sniff(in_path)? {
        Sniffed::Zip => {
            let digest = extract_bundle(in_path, &tmp_dst)?;
            (BUNDLE_FORMAT, digest)
        }
        Sniffed::Sqlite => {
            let bytes = std::fs::read(in_path)
                .with_context(|| format!("failed to read {}", in_path.to_string_lossy()))?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            std::fs::write(&tmp_dst, &bytes).with_context(|| {
                format!(
                    "failed to create temp database {}",
                    tmp_dst.to_string_lossy()
                )
            })?;
            (RAW_SQLITE_FORMAT, hex_digest(hasher))
        }
        Sniffed::Unknown => {
            return Err(anyhow!(
                "{} is neither a workspace bundle nor a SQLite database",
                in_path.to_string_lossy()
            ))
        }
    };

    // Stale WAL/SHM files belong to the database being replaced.
    for suffix in ["-wal", "-shm"] {
        let side = workspace_path.join(format!("{}{}", DB_FILE_NAME, suffix));
        if side.exists() {
            let _ = std::fs::remove_file(&side);
        }
    }
    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: detected.0.to_string(),
        db_sha256: detected.1,
    })
}

fn extract_bundle(in_path: &Path, tmp_dst: &Path) -> anyhow::Result<String> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json missing dbSha256"))?
        .to_ascii_lowercase();

    let mut bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/schoold.sqlite3")?
        .read_to_end(&mut bytes)
        .context("failed to extract database entry")?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let actual = hex_digest(hasher);
    if actual != expected {
        return Err(anyhow!(
            "database checksum mismatch: manifest {} but bundle holds {}",
            expected,
            actual
        ));
    }

    let mut db_out = File::create(tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    db_out
        .write_all(&bytes)
        .context("failed to write extracted database")?;
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    Ok(actual)
}

enum Sniffed {
    Zip,
    Sqlite,
    Unknown,
}

fn sniff(path: &Path) -> anyhow::Result<Sniffed> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 16];
    let mut read = 0;
    while read < sig.len() {
        let n = f
            .read(&mut sig[read..])
            .context("failed to read file signature")?;
        if n == 0 {
            break;
        }
        read += n;
    }
    if read >= 4 && sig[..4] == ZIP_MAGIC {
        return Ok(Sniffed::Zip);
    }
    if read == sig.len() && &sig == SQLITE_MAGIC {
        return Ok(Sniffed::Sqlite);
    }
    Ok(Sniffed::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn seeded_workspace(prefix: &str) -> std::path::PathBuf {
        let ws = temp_dir(prefix);
        let conn = db::open_db(&ws).expect("open db");
        conn.execute(
            "INSERT INTO classes(id, name, level) VALUES('c1', 'JSS 1A', 'JSS1')",
            [],
        )
        .expect("insert class");
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
        drop(conn);
        ws
    }

    #[test]
    fn bundle_round_trip_restores_rows() {
        let src = seeded_workspace("schoold-backup-src");
        let bundle = src.join("out").join("backup.zip");
        let summary = export_workspace_bundle(&src, &bundle).expect("export");
        assert_eq!(summary.bundle_format, BUNDLE_FORMAT);
        assert_eq!(summary.db_sha256.len(), 64);

        let dst = temp_dir("schoold-backup-dst");
        let imported = import_workspace_bundle(&bundle, &dst).expect("import");
        assert_eq!(imported.bundle_format_detected, BUNDLE_FORMAT);
        assert_eq!(imported.db_sha256, summary.db_sha256);

        let conn = db::open_db(&dst).expect("reopen");
        let name: String = conn
            .query_row("SELECT name FROM classes WHERE id = 'c1'", [], |r| r.get(0))
            .expect("class survives");
        assert_eq!(name, "JSS 1A");
    }

    #[test]
    fn tampered_bundle_is_rejected_and_workspace_untouched() {
        let src = seeded_workspace("schoold-backup-tamper");
        let bundle = src.join("tampered.zip");
        {
            let mut zip = ZipWriter::new(File::create(&bundle).expect("create"));
            let opts = FileOptions::default();
            zip.start_file(MANIFEST_ENTRY, opts).expect("manifest");
            let manifest = json!({ "format": BUNDLE_FORMAT, "dbSha256": "00".repeat(32) });
            zip.write_all(manifest.to_string().as_bytes()).expect("write");
            zip.start_file(DB_ENTRY, opts).expect("db entry");
            zip.write_all(b"not the real database").expect("write");
            zip.finish().expect("finish");
        }

        let dst = seeded_workspace("schoold-backup-tamper-dst");
        let e = import_workspace_bundle(&bundle, &dst).expect_err("must fail");
        assert!(e.to_string().contains("checksum mismatch"), "{e}");

        let conn = db::open_db(&dst).expect("reopen");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM classes", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let ws = temp_dir("schoold-backup-unknown");
        let bundle = ws.join("other.zip");
        {
            let mut zip = ZipWriter::new(File::create(&bundle).expect("create"));
            zip.start_file(MANIFEST_ENTRY, FileOptions::default())
                .expect("manifest");
            zip.write_all(br#"{"format":"something-else"}"#).expect("write");
            zip.finish().expect("finish");
        }
        let e = import_workspace_bundle(&bundle, &ws).expect_err("must fail");
        assert!(e.to_string().contains("unsupported bundle format"));
    }
}
