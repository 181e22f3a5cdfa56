//! Record store: CSV ingestion of the training/generation datasets plus the
//! compact binary cache with FNV-style checksum (SPEC_FULL.md §4.5, §6).

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, SgfError};
use crate::mathutils::fnv1_hash;
use crate::record::RecordMatrix;

/// One loaded dataset: the full record set (for synthesis output framing) and the
/// stats dataset used to train conditional count vectors. In this framework's
/// usual configuration both CSVs hold the same logical data, but they are kept
/// distinct because the reference treats them as independently loadable inputs.
pub struct RecordStore {
    pub records: RecordMatrix,
    pub stats: RecordMatrix,
    cache_path: PathBuf,
}

impl RecordStore {
    /// Constructs a store directly from already-loaded matrices, bypassing CSV
    /// parsing and the binary cache. Used by model unit tests and by callers
    /// that already hold parsed data.
    pub fn in_memory(records: RecordMatrix, stats: RecordMatrix) -> RecordStore {
        RecordStore { records, stats, cache_path: PathBuf::new() }
    }

    /// Content address: `<workdir>/<dataprefix-stem>.cache` so re-runs against the
    /// same working directory and input data skip reparsing CSVs.
    fn cache_path(workdir: &Path, dataprefix: &Path) -> PathBuf {
        let stem = dataprefix
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        workdir.join(format!("{stem}.cache"))
    }

    pub fn on_disk(workdir: &Path, dataprefix: &Path) -> bool {
        Self::cache_path(workdir, dataprefix).exists()
    }

    /// Loads from the binary cache if present, otherwise parses the CSVs and
    /// writes the cache for next time ("initialize" in the reference's `Store`).
    pub fn initialize(workdir: &Path, dataprefix: &Path, attr_count: usize) -> Result<RecordStore> {
        let cache_path = Self::cache_path(workdir, dataprefix);
        if cache_path.exists() {
            info!(path = %cache_path.display(), "loading record store from cache");
            return Self::load(cache_path, dataprefix, attr_count);
        }
        let mut store = Self::create(dataprefix, attr_count)?;
        store.cache_path = cache_path;
        store.store()?;
        Ok(store)
    }

    fn create(dataprefix: &Path, attr_count: usize) -> Result<RecordStore> {
        let records = load_csv_matrix(&suffixed(dataprefix, "_records.csv"), attr_count)?;
        let stats = load_csv_matrix(&suffixed(dataprefix, "_stats.csv"), attr_count)?;
        info!(records = records.rows(), stats = stats.rows(), "parsed record store from CSV");
        Ok(RecordStore { records, stats, cache_path: PathBuf::new() })
    }

    /// Writes both matrices back to back in one file: `records` then `stats`,
    /// each framed as `u32` row count + row-major `u16` values + trailing `u64`
    /// FNV checksum of the payload that precedes it.
    fn store(&self) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::File::create(&self.cache_path)?;
        write_matrix(&mut f, &self.records)?;
        write_matrix(&mut f, &self.stats)?;
        info!(path = %self.cache_path.display(), "wrote record store cache");
        Ok(())
    }

    fn load(cache_path: PathBuf, dataprefix: &Path, attr_count: usize) -> Result<RecordStore> {
        let mut f = fs::File::open(&cache_path)?;
        let records = read_matrix(&mut f, &cache_path, attr_count)?;
        let stats = match read_matrix(&mut f, &cache_path, attr_count) {
            Ok(m) => m,
            Err(_) => {
                // Older caches written before the stats matrix was appended: fall
                // back to the CSV for stats only.
                load_csv_matrix(&suffixed(dataprefix, "_stats.csv"), attr_count)?
            }
        };
        Ok(RecordStore { records, stats, cache_path })
    }
}

fn write_matrix<W: Write>(w: &mut W, m: &RecordMatrix) -> Result<()> {
    let rows = m.rows() as u32;
    w.write_all(&rows.to_le_bytes())?;
    let payload: Vec<u8> = m.as_slice().iter().flat_map(|v| v.to_le_bytes()).collect();
    w.write_all(&payload)?;
    let checksum = fnv1_hash(&payload);
    w.write_all(&checksum.to_le_bytes())?;
    Ok(())
}

fn read_matrix<R: Read>(r: &mut R, path: &Path, cols: usize) -> Result<RecordMatrix> {
    let mut count_buf = [0u8; 4];
    r.read_exact(&mut count_buf)?;
    let rows = u32::from_le_bytes(count_buf) as usize;
    let mut payload = vec![0u8; rows * cols * 2];
    r.read_exact(&mut payload)?;
    let mut checksum_buf = [0u8; 8];
    r.read_exact(&mut checksum_buf)?;
    let stored = u64::from_le_bytes(checksum_buf);
    let computed = fnv1_hash(&payload);
    if stored != computed {
        return Err(SgfError::io(path.to_path_buf(), "binary cache checksum mismatch"));
    }
    let data: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Ok(RecordMatrix::from_flat(data, cols))
}

/// `_records.csv`/`_stats.csv` always carry a header row; `has_headers(true)`
/// consumes it before `.records()` starts yielding data rows.
fn load_csv_matrix(path: &Path, cols: usize) -> Result<RecordMatrix> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| SgfError::io(path.to_path_buf(), e.to_string()))?;
    let mut m = RecordMatrix::new(cols);
    for rec in rdr.records() {
        let rec = rec.map_err(SgfError::from)?;
        let row: Result<Vec<u16>> = rec
            .iter()
            .map(|s| {
                let v: i64 = s
                    .trim()
                    .parse()
                    .map_err(|_| SgfError::io(path.to_path_buf(), format!("invalid value '{s}'")))?;
                if !(1..=65535).contains(&v) {
                    return Err(SgfError::io(path.to_path_buf(), format!("value {v} out of 1-based range")));
                }
                Ok((v - 1) as u16)
            })
            .collect();
        let row = row?;
        if row.len() != cols {
            return Err(SgfError::config(format!(
                "{}: row has {} values, expected {cols} attributes",
                path.display(),
                row.len()
            )));
        }
        m.push_row(&row);
    }
    Ok(m)
}

fn suffixed(dataprefix: &Path, suffix: &str) -> PathBuf {
    let mut s = dataprefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn binary_cache_round_trips() {
        let mut m = RecordMatrix::new(3);
        m.push_row(&[0, 1, 2]);
        m.push_row(&[2, 1, 0]);
        let mut buf = Vec::new();
        write_matrix(&mut buf, &m).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let back = read_matrix(&mut cursor, Path::new("test"), 3).unwrap();
        assert_eq!(back.row(0), m.row(0));
        assert_eq!(back.row(1), m.row(1));
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let mut m = RecordMatrix::new(2);
        m.push_row(&[0, 1]);
        let mut buf = Vec::new();
        write_matrix(&mut buf, &m).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_matrix(&mut cursor, Path::new("test"), 2).is_err());
    }

    #[test]
    fn csv_values_are_converted_to_0_based() {
        let dir = std::env::temp_dir().join(format!("sgf-store-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ds_records.csv");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "a,b,c").unwrap();
        writeln!(f, "1,2,3").unwrap();
        writeln!(f, "4,3,2").unwrap();
        let m = load_csv_matrix(&path, 3).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.row(0), &[0, 1, 2]);
        assert_eq!(m.row(1), &[3, 2, 1]);
        fs::remove_dir_all(&dir).ok();
    }
}
