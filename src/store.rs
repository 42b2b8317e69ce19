use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::access::SingleAdmin;
use crate::error::StateError;
use crate::ledger::{FractionalLedger, LedgerState, PriceSchedule};
use crate::payment::SimulatedRail;
use crate::registry::InMemoryRegistry;

pub const STATE_VERSION: u8 = 1;

/// Ledger wired to the in-process collaborators the CLI persists.
pub type LocalLedger = FractionalLedger<InMemoryRegistry, SingleAdmin, SimulatedRail>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file {0:?} not found")]
    Missing(PathBuf),
    #[error("state file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("state file {path:?} is not valid: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("state file version {found} is not supported")]
    Version { found: u8 },
    #[error("state file belongs to ledger {found:?}, configured ledger is {expected:?}")]
    LedgerMismatch { expected: String, found: String },
    #[error("state file is inconsistent: {0}")]
    Inconsistent(#[from] StateError),
}

/// On-disk form of a ledger together with its registry and payment book.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateFile {
    pub version: u8,
    pub ledger: LedgerState,
    pub registry: InMemoryRegistry,
    pub rail: SimulatedRail,
}

impl StateFile {
    pub fn fresh(ledger_id: &str, prices: PriceSchedule) -> Self {
        Self {
            version: STATE_VERSION,
            ledger: LedgerState::new(ledger_id, prices),
            registry: InMemoryRegistry::new(),
            rail: SimulatedRail::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        let bytes = fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: Self = serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if file.version != STATE_VERSION {
            return Err(StoreError::Version {
                found: file.version,
            });
        }
        Ok(file)
    }

    /// Write through a sibling temp file so a crash never leaves a torn state.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    pub fn into_ledger(
        self,
        expected_ledger: &str,
        guard: SingleAdmin,
    ) -> Result<LocalLedger, StoreError> {
        if self.ledger.ledger_id != expected_ledger {
            return Err(StoreError::LedgerMismatch {
                expected: expected_ledger.to_string(),
                found: self.ledger.ledger_id,
            });
        }
        self.ledger.validate(&self.registry)?;
        Ok(FractionalLedger::from_state(
            self.ledger,
            self.registry,
            guard,
            self.rail,
        ))
    }

    pub fn from_ledger(ledger: LocalLedger) -> Self {
        let (ledger, registry, _guard, rail) = ledger.into_parts();
        Self {
            version: STATE_VERSION,
            ledger,
            registry,
            rail,
        }
    }
}
