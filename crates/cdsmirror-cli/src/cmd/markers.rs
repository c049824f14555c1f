//! `--list` and `--verify`: inspect completion markers

use anyhow::{Context, Result};
use comfy_table::{Cell, Color};
use indicatif::HumanBytes;

use cdsmirror_plan::DatasetSpec;
use cdsmirror_store::{Storage, short_hash};

use super::new_table;

/// Datasets sharing a namespace list the same markers; show each prefix once.
fn namespaces(specs: &[DatasetSpec]) -> Vec<&DatasetSpec> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for spec in specs {
        let tag = (spec.storage.describe(), spec.key_prefix());
        if !seen.contains(&tag) {
            seen.push(tag);
            out.push(spec);
        }
    }
    out
}

fn open(spec: &DatasetSpec) -> Result<Box<dyn Storage>> {
    spec.storage
        .open()
        .with_context(|| format!("{}: cannot open {}", spec.id, spec.storage.describe()))
}

pub fn list(specs: &[DatasetSpec]) -> Result<usize> {
    let mut table = new_table(&["Key", "Artifact", "Size", "Fetched", "blake3"]);
    let mut total = 0usize;
    let mut bytes = 0u64;

    for spec in namespaces(specs) {
        let storage = open(spec)?;
        let keys = storage
            .list(&spec.key_prefix())
            .with_context(|| format!("{}: listing failed", spec.id))?;
        for key in keys {
            let Some(marker) = storage
                .read_marker(&key)
                .with_context(|| format!("{key}: unreadable marker"))?
            else {
                continue;
            };
            total += 1;
            bytes += marker.bytes;
            table.add_row(vec![
                Cell::new(&marker.key),
                Cell::new(&marker.artifact),
                Cell::new(HumanBytes(marker.bytes).to_string()),
                Cell::new(marker.fetched_at.format("%Y-%m-%d %H:%M").to_string()),
                Cell::new(short_hash(&marker.blake3)),
            ]);
        }
    }

    if total == 0 {
        eprintln!("No completed partitions.");
    } else {
        eprintln!("\n{table}");
        eprintln!("{total} partition(s), {}", HumanBytes(bytes));
    }
    Ok(total)
}

/// Returns the number of partitions that failed verification.
pub fn verify(specs: &[DatasetSpec]) -> Result<usize> {
    let mut table = new_table(&["Key", "Expected", "Actual", "Checksum", "Status"]);
    let mut checked = 0usize;
    let mut bad = 0usize;

    for spec in namespaces(specs) {
        let storage = open(spec)?;
        for key in storage.list(&spec.key_prefix())? {
            checked += 1;
            let (mut row, ok) = match storage.verify(&key) {
                Ok(r) => {
                    let actual = r
                        .actual_bytes
                        .map(|b| b.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    let checksum = match r.checksum_ok {
                        Some(true) => "ok",
                        Some(false) => "MISMATCH",
                        None => "-",
                    };
                    let ok = r.ok();
                    (
                        vec![
                            Cell::new(&key),
                            Cell::new(r.expected_bytes),
                            Cell::new(actual),
                            Cell::new(checksum),
                        ],
                        ok,
                    )
                }
                Err(e) => (
                    vec![Cell::new(&key), Cell::new("-"), Cell::new("-"), Cell::new(e.to_string())],
                    false,
                ),
            };
            if !ok {
                bad += 1;
                log::error!("{key}: verification failed");
            }
            row.push(if ok {
                Cell::new("OK").fg(Color::Green)
            } else {
                Cell::new("BAD").fg(Color::Red)
            });
            table.add_row(row);
        }
    }

    if checked == 0 {
        eprintln!("No completed partitions to verify.");
        return Ok(0);
    }
    eprintln!("\n{table}");
    eprintln!("{checked} checked, {bad} bad");
    if bad > 0 {
        eprintln!("Delete the marker of a bad partition to have it fetched again.");
    }
    Ok(bad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdsmirror_core::DateRange;
    use cdsmirror_plan::{Granularity, StorageTarget};
    use cdsmirror_store::{ArtifactWrite, FsStorage};
    use chrono::NaiveDate;
    use serde_json::{Map, json};

    fn spec(dir: &std::path::Path, id: &str) -> DatasetSpec {
        DatasetSpec::new(
            id,
            "era5",
            Granularity::Yearly,
            Map::new(),
            None,
            Some(vec![2020]),
            0,
            StorageTarget::Fs {
                base_dir: dir.to_path_buf(),
            },
        )
        .unwrap()
    }

    fn seed(dir: &std::path::Path) {
        let storage = FsStorage::new(dir).unwrap();
        let req = json!({});
        let write = ArtifactWrite {
            key: "era5/2020",
            extension: "grib",
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            ),
            request: &req,
            force: false,
            partial: false,
        };
        storage.write_artifact(&write, &mut &b"GRIB"[..]).unwrap();
    }

    #[test]
    fn siblings_share_one_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let specs = vec![spec(dir.path(), "a"), spec(dir.path(), "b")];
        assert_eq!(namespaces(&specs).len(), 1);
    }

    #[test]
    fn list_and_verify_clean_store() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let specs = vec![spec(dir.path(), "a")];
        assert_eq!(list(&specs).unwrap(), 1);
        assert_eq!(verify(&specs).unwrap(), 0);
    }

    #[test]
    fn verify_flags_tampered_artifact() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        std::fs::write(dir.path().join("era5/2020.grib"), b"XXXX").unwrap();
        let specs = vec![spec(dir.path(), "a")];
        assert_eq!(verify(&specs).unwrap(), 1);
    }
}
