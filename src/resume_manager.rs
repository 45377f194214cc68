use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::route_enumerator::QueryUnit;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ProgressState {
    pub completed_units: BTreeSet<String>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl ProgressState {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut state = if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<ProgressState>(&content) {
                    Ok(state) => {
                        info!(
                            "Resumed previous session: {} units completed.",
                            state.completed_units.len()
                        );
                        state
                    }
                    Err(e) => {
                        error!("Failed to parse progress file {:?}: {}. Starting fresh.", path, e);
                        ProgressState::default()
                    }
                },
                Err(e) => {
                    error!("Failed to read progress file {:?}: {}", path, e);
                    ProgressState::default()
                }
            }
        } else {
            info!("No progress file at {:?}. Starting fresh.", path);
            ProgressState::default()
        };
        state.path = Some(path.to_path_buf());
        state
    }

    pub fn ephemeral() -> Self {
        ProgressState::default()
    }

    pub fn contains(&self, unit: &QueryUnit) -> bool {
        self.completed_units.contains(&unit.key())
    }

    pub fn len(&self) -> usize {
        self.completed_units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed_units.is_empty()
    }

    pub fn mark_complete(&mut self, unit: &QueryUnit) {
        self.completed_units.insert(unit.key());
        self.save();
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let json = match serde_json::to_string_pretty(self) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize progress state: {}", e);
                return;
            }
        };

        let mut file = match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
        {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open progress file {:?} for writing: {}", path, e);
                return;
            }
        };

        if let Err(e) = file.write_all(json.as_bytes()) {
            error!("Failed to write to progress file {:?}: {}", path, e);
        }
    }
}
