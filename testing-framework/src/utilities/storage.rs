// File: testing-framework/src/utilities/storage.rs
//
// Storage Utilities
//
// RAII temporary data directories, plus the on-disk funding files a node
// reads when it builds miner-info transactions:
//
//   <datadir>/regtest/miner_id/Funding/.minerinfotxsigningkey.dat
//   <datadir>/regtest/miner_id/Funding/minerinfotxfunding.dat

use crate::config::FundingWriteMode;
use crate::funding::FundingRecord;
use minerid_common::crypto::KeyPair;
use minerid_common::transaction::OutPoint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const SIGNING_KEY_FILE: &str = ".minerinfotxsigningkey.dat";
pub const FUNDING_SEED_FILE: &str = "minerinfotxfunding.dat";

/// RAII wrapper for a temporary node/participant data directory.
///
/// The directory and everything below it is removed on drop, including
/// when the test panics.
///
/// # Example
///
/// ```ignore
/// use minerid_testing_framework::utilities::create_temp_datadir;
///
/// let root = create_temp_datadir()?;
/// let network = SimNetwork::builder().with_datadir_root(root.path()).build()?;
/// ```
pub struct TempDataDir {
    _temp_dir: TempDir,
    path: PathBuf,
}

impl TempDataDir {
    pub fn new() -> io::Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("minerid_reorg_")
            .tempdir()?;
        let path = temp_dir.path().to_path_buf();

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Created temporary datadir at: {:?}", path);
        }

        Ok(Self {
            _temp_dir: temp_dir,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_buf(&self) -> PathBuf {
        self.path.clone()
    }
}

impl Drop for TempDataDir {
    fn drop(&mut self) {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Cleaning up temporary datadir at: {:?}", self.path);
        }
    }
}

pub fn create_temp_datadir() -> io::Result<TempDataDir> {
    TempDataDir::new()
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigningKeyFile {
    funding_key: FundingKey,
}

#[derive(Serialize, Deserialize)]
struct FundingKey {
    #[serde(rename = "privateBIP32")]
    private_bip32: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingSeedFile {
    funding_destination: FundingDestination,
    first_funding_outpoint: OutPoint,
}

#[derive(Serialize, Deserialize)]
struct FundingDestination {
    #[serde(rename = "addressBase58")]
    address_base58: String,
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, message.into())
}

/// Miner-id funding files of one data directory
pub struct FundingStore {
    dir: PathBuf,
    mode: FundingWriteMode,
}

impl FundingStore {
    pub fn new(datadir: &Path) -> Self {
        Self {
            dir: datadir.join("regtest").join("miner_id").join("Funding"),
            mode: FundingWriteMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: FundingWriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(self.dir.join(FUNDING_SEED_FILE))
            .await
            .unwrap_or(false)
    }

    /// Persist `record`, replacing or appending per the write mode
    pub async fn save(&self, record: &FundingRecord) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let key = SigningKeyFile {
            funding_key: FundingKey {
                private_bip32: record.private_key.to_extended_private_key(),
            },
        };
        let seed = FundingSeedFile {
            funding_destination: FundingDestination {
                address_base58: record.destination.clone(),
            },
            first_funding_outpoint: record.first_outpoint,
        };

        self.write_record(SIGNING_KEY_FILE, &key).await?;
        self.write_record(FUNDING_SEED_FILE, &seed).await
    }

    async fn write_record<T: Serialize>(&self, name: &str, value: &T) -> io::Result<()> {
        let path = self.dir.join(name);
        match self.mode {
            FundingWriteMode::Upsert => {
                let bytes = serde_json::to_vec(value).map_err(io::Error::from)?;
                let tmp = self.dir.join(format!("{}.tmp", name));
                fs::write(&tmp, bytes).await?;
                fs::rename(&tmp, &path).await
            }
            FundingWriteMode::Append => {
                let mut bytes = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
                let mut serializer = serde_json::Serializer::with_formatter(&mut bytes, formatter);
                value.serialize(&mut serializer).map_err(io::Error::from)?;

                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await?;
                file.write_all(&bytes).await?;
                file.flush().await
            }
        }
    }

    /// Read the current record. With appended files the last record wins.
    pub async fn load(&self) -> io::Result<FundingRecord> {
        let key: SigningKeyFile = self.read_last(SIGNING_KEY_FILE).await?;
        let seed: FundingSeedFile = self.read_last(FUNDING_SEED_FILE).await?;
        let private_key = KeyPair::from_extended_private_key(&key.funding_key.private_bip32)
            .map_err(|e| invalid_data(format!("funding key: {}", e)))?;
        Ok(FundingRecord {
            destination: seed.funding_destination.address_base58,
            first_outpoint: seed.first_funding_outpoint,
            private_key,
        })
    }

    async fn read_last<T: DeserializeOwned>(&self, name: &str) -> io::Result<T> {
        let path = self.dir.join(name);
        let bytes = fs::read(&path).await?;
        let mut last = None;
        for value in serde_json::Deserializer::from_slice(&bytes).into_iter::<T>() {
            last = Some(value.map_err(|e| invalid_data(format!("{}: {}", path.display(), e)))?);
        }
        last.ok_or_else(|| invalid_data(format!("{} holds no record", path.display())))
    }

    /// Number of records in the funding seed file
    pub async fn record_count(&self) -> io::Result<usize> {
        let bytes = fs::read(self.dir.join(FUNDING_SEED_FILE)).await?;
        Ok(serde_json::Deserializer::from_slice(&bytes)
            .into_iter::<serde_json::Value>()
            .filter(Result::is_ok)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minerid_common::crypto::{hash256, p2pkh_address};

    fn record(seed: u8, vout: u32) -> FundingRecord {
        let key = KeyPair::from_seed(&[seed]).unwrap();
        FundingRecord {
            destination: p2pkh_address(&key.public_key()),
            first_outpoint: OutPoint::new(hash256(&[seed]), vout),
            private_key: key,
        }
    }

    #[test]
    fn test_temp_datadir_cleanup() {
        let path;
        {
            let dir = create_temp_datadir().unwrap();
            path = dir.path_buf();
            assert!(path.is_dir());
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_upsert_replaces_record() {
        let dir = create_temp_datadir().unwrap();
        let store = FundingStore::new(dir.path());
        assert!(!store.exists().await);

        store.save(&record(7, 0)).await.unwrap();
        store.save(&record(8, 0)).await.unwrap();
        assert_eq!(store.record_count().await.unwrap(), 1);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, record(8, 0));
        assert!(store.dir().ends_with("regtest/miner_id/Funding"));
    }

    #[tokio::test]
    async fn test_append_keeps_history_and_reads_last() {
        let dir = create_temp_datadir().unwrap();
        let store = FundingStore::new(dir.path()).with_mode(FundingWriteMode::Append);
        store.save(&record(7, 0)).await.unwrap();
        store.save(&record(7, 1)).await.unwrap();

        assert_eq!(store.record_count().await.unwrap(), 2);
        assert_eq!(store.load().await.unwrap().first_outpoint.vout, 1);

        let text = std::fs::read_to_string(store.dir().join(FUNDING_SEED_FILE)).unwrap();
        assert!(text.contains("\n   \"fundingDestination\""));
        assert!(text.contains("\"firstFundingOutpoint\""));
    }

    #[tokio::test]
    async fn test_on_disk_shape() {
        let dir = create_temp_datadir().unwrap();
        let store = FundingStore::new(dir.path());
        store.save(&record(9, 0)).await.unwrap();

        let key: serde_json::Value = serde_json::from_slice(
            &std::fs::read(store.dir().join(SIGNING_KEY_FILE)).unwrap(),
        )
        .unwrap();
        let tprv = key["fundingKey"]["privateBIP32"].as_str().unwrap();
        assert!(tprv.starts_with("tprv"));

        let seed: serde_json::Value = serde_json::from_slice(
            &std::fs::read(store.dir().join(FUNDING_SEED_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(seed["firstFundingOutpoint"]["n"], 0);
        assert!(seed["fundingDestination"]["addressBase58"].is_string());
    }

    #[tokio::test]
    async fn test_missing_files_are_not_found() {
        let dir = create_temp_datadir().unwrap();
        let err = FundingStore::new(dir.path()).load().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
