use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Calibration sweep sample as stored on disk.
///
/// Expected headers (any order, `weight` optional):
/// z_um,error,weight
///
/// Example:
/// z_um,error,weight
/// -0.75,-0.231,18213.4
/// -0.675,-0.207,18240.1
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct CalibrationRow {
    pub z_um: f64,
    pub error: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

pub fn load_calibration_samples_csv(path: &Path) -> eyre::Result<Vec<CalibrationRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    for required in ["z_um", "error"] {
        if !headers.iter().any(|h| h == required) {
            eyre::bail!(
                "calibration CSV must have headers 'z_um,error[,weight]', got: {}",
                headers.iter().collect::<Vec<_>>().join(",")
            );
        }
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    Ok(rows)
}

/// Write samples in order, replacing `path` atomically.
///
/// Parent directories are created. Floats are written in shortest
/// round-trip form so a reload reproduces every value exactly.
pub fn save_calibration_samples_csv(path: &Path, rows: &[CalibrationRow]) -> eyre::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| eyre::eyre!("create directory {:?}: {}", parent, e))?;
    }

    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row)
            .map_err(|e| eyre::eyre!("encode calibration row: {}", e))?;
    }
    if rows.is_empty() {
        wtr.write_record(["z_um", "error", "weight"])
            .map_err(|e| eyre::eyre!("encode calibration header: {}", e))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| eyre::eyre!("flush calibration CSV: {}", e.error()))?;

    write_atomic(path, &bytes).map_err(|e| eyre::eyre!("write calibration CSV {:?}: {}", path, e))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let tmp = path.with_extension("csv.new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}
