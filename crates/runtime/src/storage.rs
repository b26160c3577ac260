//! On-disk layout of a simulation and the handshake file formats.
//!
//! ```text
//! storage/{sim_code}/
//!   reverie/meta.json
//!   environment/{N}.json     frontend → backend
//!   movement/{N}.json        backend → frontend
//!   personas/{name}/bootstrap_memory/…
//! temp/curr_sim_code.json
//! temp/curr_step.json
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use simulacra_memory::timefmt;
use simulacra_world::TileCoord;

pub const DATE_FORMAT: &str = "%B %d, %Y";

/// `reverie/meta.json` — the simulation's global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimMeta {
    pub fork_sim_code: String,
    /// `"%B %d, %Y"`, midnight of the first simulated day.
    pub start_date: String,
    #[serde(with = "timefmt")]
    pub curr_time: NaiveDateTime,
    pub sec_per_step: i64,
    pub maze_name: String,
    pub persona_names: Vec<String>,
    pub step: u64,
}

impl SimMeta {
    pub fn start_time(&self) -> Result<NaiveDateTime> {
        let date = NaiveDate::parse_from_str(&self.start_date, DATE_FORMAT)
            .with_context(|| format!("bad start_date {:?}", self.start_date))?;
        Ok(date.and_hms_opt(0, 0, 0).expect("midnight exists"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.as_ref().display()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// One persona's entry in `environment/{N}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvPersona {
    pub x: usize,
    pub y: usize,
    #[serde(default)]
    pub maze: Option<String>,
}

impl EnvPersona {
    pub fn tile(&self) -> TileCoord {
        (self.x, self.y)
    }
}

/// One persona's entry in `movement/{N}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaMovement {
    pub movement: TileCoord,
    pub pronunciatio: String,
    pub description: String,
    pub chat: Option<Vec<(String, String)>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementMeta {
    pub curr_time: String,
}

/// `movement/{N}.json` — the backend's answer for one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementFile {
    pub persona: BTreeMap<String, PersonaMovement>,
    pub meta: MovementMeta,
}

/// Recursively copy a simulation directory (the fork bootstrap).
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Signal the frontend which simulation and step are live.
pub fn write_tempo_files(temp_dir: &Path, sim_code: &str, step: u64) -> Result<()> {
    fs::create_dir_all(temp_dir)?;
    fs::write(
        temp_dir.join("curr_sim_code.json"),
        serde_json::to_string_pretty(&serde_json::json!({ "sim_code": sim_code }))?,
    )?;
    fs::write(
        temp_dir.join("curr_step.json"),
        serde_json::to_string_pretty(&serde_json::json!({ "step": step }))?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_roundtrips_with_snapshot_datetimes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("meta.json");

        let meta = SimMeta {
            fork_sim_code: "base_the_ville".into(),
            start_date: "February 13, 2023".into(),
            curr_time: timefmt::parse("February 13, 2023, 00:00:00")?,
            sec_per_step: 10,
            maze_name: "the ville".into(),
            persona_names: vec!["Isabella Rodriguez".into()],
            step: 0,
        };
        meta.save(&path)?;

        let loaded = SimMeta::load(&path)?;
        assert_eq!(loaded.curr_time, meta.curr_time);
        assert_eq!(loaded.start_time()?, meta.curr_time);
        assert_eq!(loaded.persona_names, meta.persona_names);
        Ok(())
    }

    #[test]
    fn copy_preserves_nested_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("src/inner");
        fs::create_dir_all(&src)?;
        fs::write(src.join("file.json"), "{}")?;

        copy_dir_recursive(&dir.path().join("src"), &dir.path().join("dst"))?;
        assert!(dir.path().join("dst/inner/file.json").exists());
        Ok(())
    }
}
