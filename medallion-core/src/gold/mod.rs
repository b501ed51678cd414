//! Gold layer: feature contracts applied to Silver rows, producing normalized
//! `(samples, sequence_length, features)` tensors.
//!
//! # Normalization discipline
//! Training paths fit parameters and persist them as a new version for
//! (symbol, contract). Inference paths only ever load saved parameters; with
//! none saved they fail with `MissingNormalization` instead of fitting on the
//! inference window. In a train/test split, parameters are fit on the train
//! partition alone and then applied unchanged to the test partition.

pub(crate) mod artifact;
mod batch;
pub mod normalize;
pub mod select;
pub mod sequence;

pub use batch::{GoldBatch, ParamVersion, SplitInfo, StoredNormalization};
pub use normalize::{FeatureScale, NormalizationParams};
pub use select::{select_features, FeatureMatrix, Selection};

use crate::catalog::{self, Catalog, CATALOG_FILE};
use crate::contract::{ContractId, FeatureContract};
use crate::error::{Error, Result, SchemaError};
use crate::frame::Frame;
use crate::ids::{new_id, IdKind};
use crate::storage::{self, check_name};
use crate::tensor::Tensor3;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Tensors and metadata of a persisted Gold batch.
#[derive(Debug, Clone)]
pub struct GoldArtifacts {
    pub batch: GoldBatch,
    /// One tensor for a one-shot batch; train then test for a split.
    pub tensors: Vec<Tensor3>,
}

pub struct GoldBuilder {
    root: PathBuf,
    catalog: Catalog,
}

impl GoldBuilder {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let catalog = Catalog::open(root.join(CATALOG_FILE), batch::SCHEMA)?;
        Ok(Self { root, catalog })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record `contract` under its identity. Registering the same definition
    /// twice is a no-op; a different definition under a taken identity is a
    /// `ContractMismatch`.
    pub fn register_contract(&self, contract: &FeatureContract) -> Result<()> {
        contract.validate()?;
        let added = self
            .catalog
            .write(|tx| batch::register_contract(tx, contract, catalog::now()))?;
        if added {
            info!(contract = %contract.id(), features = contract.num_features(), "feature contract registered");
        }
        Ok(())
    }

    pub fn contract(&self, id: &ContractId) -> Result<Option<FeatureContract>> {
        self.catalog.read(|conn| batch::load_contract(conn, id))
    }

    /// One-shot path: fit (and persist) or load parameters, window every row.
    pub fn process(
        &self,
        symbol: &str,
        silver_rows: &Frame,
        silver_batch_id: &str,
        contract: &FeatureContract,
        fit_normalization: bool,
    ) -> Result<(Tensor3, GoldBatch)> {
        check_name("symbol", symbol)?;
        self.register_contract(contract)?;
        let length = contract.sequence_length;
        if silver_rows.len() < length {
            return Err(Error::InsufficientData {
                needed: length,
                available: silver_rows.len(),
            });
        }

        let selection = select_features(symbol, silver_rows, contract);
        let (params, loaded_version) = if fit_normalization {
            (
                NormalizationParams::fit(contract.normalization, &selection.matrix),
                None,
            )
        } else {
            let stored = self.require_params(symbol, contract, ParamVersion::Current)?;
            (stored.params, Some(stored.version))
        };
        let tensor = sequence::windows(&params.apply(&selection.matrix)?, length)?;

        let created_at = catalog::now();
        let batch_id = new_id(IdKind::Gold, symbol, created_at, silver_batch_id);
        let dir = artifact_dir(symbol);
        let tensor_file = dir.join(format!("{batch_id}.parquet"));
        artifact::write_tensor(&self.root.join(&tensor_file), &tensor, &contract.features)?;

        let mut gold = self.new_batch(
            batch_id,
            symbol,
            Some(silver_batch_id),
            contract,
            silver_rows,
            &selection,
            params,
            created_at,
        )?;
        gold.samples = tensor.samples();
        gold.tensor_files = vec![tensor_file];
        self.persist(&mut gold, contract, fit_normalization, loaded_version)?;
        Ok((tensor, gold))
    }

    /// Latest window normalized with the current saved parameters.
    ///
    /// `Ok(None)` when fewer than `sequence_length` rows are available.
    pub fn get_inference_tensor(
        &self,
        symbol: &str,
        silver_rows: &Frame,
        contract: &FeatureContract,
    ) -> Result<Option<Tensor3>> {
        Ok(self
            .inference(symbol, silver_rows, None, contract, ParamVersion::Current)?
            .map(|(tensor, _)| tensor))
    }

    /// As [`get_inference_tensor`](Self::get_inference_tensor) but with a
    /// specific saved parameter version.
    pub fn get_inference_tensor_pinned(
        &self,
        symbol: &str,
        silver_rows: &Frame,
        contract: &FeatureContract,
        version: u32,
    ) -> Result<Option<Tensor3>> {
        Ok(self
            .inference(symbol, silver_rows, None, contract, ParamVersion::Pinned(version))?
            .map(|(tensor, _)| tensor))
    }

    /// Inference tensor plus its (uncataloged) batch metadata.
    pub fn get_inference_batch(
        &self,
        symbol: &str,
        silver_rows: &Frame,
        silver_batch_id: Option<&str>,
        contract: &FeatureContract,
    ) -> Result<Option<(Tensor3, GoldBatch)>> {
        self.inference(symbol, silver_rows, silver_batch_id, contract, ParamVersion::Current)
    }

    fn inference(
        &self,
        symbol: &str,
        silver_rows: &Frame,
        silver_batch_id: Option<&str>,
        contract: &FeatureContract,
        which: ParamVersion,
    ) -> Result<Option<(Tensor3, GoldBatch)>> {
        contract.validate()?;
        self.check_registered(contract)?;
        let length = contract.sequence_length;
        if silver_rows.len() < length {
            debug!(symbol, rows = silver_rows.len(), needed = length, "not enough history for inference");
            return Ok(None);
        }

        let stored = self.require_params(symbol, contract, which)?;
        let tail = silver_rows.tail(length);
        let selection = select_features(symbol, &tail, contract);
        let tensor = sequence::latest_window(&stored.params.apply(&selection.matrix)?, length)?;

        let created_at = catalog::now();
        let batch_id = new_id(IdKind::Gold, symbol, created_at, silver_batch_id.unwrap_or(""));
        let mut gold = self.new_batch(
            batch_id,
            symbol,
            silver_batch_id,
            contract,
            &tail,
            &selection,
            stored.params,
            created_at,
        )?;
        gold.samples = tensor.samples();
        gold.normalization_version = stored.version;
        Ok(Some((tensor, gold)))
    }

    /// Temporal split at `floor(train_ratio * rows)`, fit on the train rows.
    pub fn get_training_split(
        &self,
        symbol: &str,
        silver_rows: &Frame,
        train_ratio: f64,
        contract: &FeatureContract,
    ) -> Result<(Tensor3, Tensor3, GoldBatch)> {
        self.get_training_split_from(symbol, silver_rows, None, train_ratio, contract)
    }

    /// Training split recording the Silver batch the rows came from.
    pub fn get_training_split_from(
        &self,
        symbol: &str,
        silver_rows: &Frame,
        silver_batch_id: Option<&str>,
        train_ratio: f64,
        contract: &FeatureContract,
    ) -> Result<(Tensor3, Tensor3, GoldBatch)> {
        check_name("symbol", symbol)?;
        if train_ratio.is_nan() || train_ratio <= 0.0 || train_ratio >= 1.0 {
            return Err(Error::InvalidTrainRatio(train_ratio));
        }
        self.register_contract(contract)?;
        let length = contract.sequence_length;

        let rows = silver_rows.len();
        let train_rows = (train_ratio * rows as f64).floor() as usize;
        if train_rows < length {
            return Err(Error::InsufficientData {
                needed: length,
                available: train_rows,
            });
        }

        let selection = select_features(symbol, silver_rows, contract);
        let train = selection.matrix.slice(0, train_rows);
        let test = selection.matrix.slice(train_rows, rows);
        let params = NormalizationParams::fit(contract.normalization, &train);

        let train_tensor = sequence::windows(&params.apply(&train)?, length)?;
        let test_tensor = if test.rows() >= length {
            sequence::windows(&params.apply(&test)?, length)?
        } else {
            warn!(
                symbol,
                test_rows = test.rows(),
                needed = length,
                "test partition shorter than one window; test tensor is empty"
            );
            Tensor3::empty(length, contract.num_features())
        };

        let created_at = catalog::now();
        let batch_id = new_id(IdKind::Gold, symbol, created_at, silver_batch_id.unwrap_or(""));
        let dir = artifact_dir(symbol);
        let train_file = dir.join(format!("{batch_id}.train.parquet"));
        let test_file = dir.join(format!("{batch_id}.test.parquet"));
        artifact::write_tensor(&self.root.join(&train_file), &train_tensor, &contract.features)?;
        if let Err(err) = artifact::write_tensor(&self.root.join(&test_file), &test_tensor, &contract.features) {
            storage::discard(&self.root.join(&train_file));
            return Err(err);
        }

        let mut gold = self.new_batch(
            batch_id,
            symbol,
            silver_batch_id,
            contract,
            silver_rows,
            &selection,
            params,
            created_at,
        )?;
        gold.samples = train_tensor.samples() + test_tensor.samples();
        gold.split = Some(SplitInfo {
            train_ratio,
            train_rows,
            test_rows: rows - train_rows,
            train_samples: train_tensor.samples(),
            test_samples: test_tensor.samples(),
            test_start: test.dates().first().copied(),
        });
        gold.tensor_files = vec![train_file, test_file];
        self.persist(&mut gold, contract, true, None)?;
        Ok((train_tensor, test_tensor, gold))
    }

    /// Read a persisted batch and its tensors back.
    pub fn load_batch(&self, batch_id: &str) -> Result<GoldArtifacts> {
        let gold = self
            .catalog
            .read(|conn| batch::load_batch(conn, batch_id))?
            .ok_or_else(|| Error::BatchNotFound(batch_id.to_string()))?;
        let features = gold.normalization.feature_names();
        let features: Vec<String> = features.into_iter().map(str::to_string).collect();
        let tensors = gold
            .tensor_files
            .iter()
            .map(|file| artifact::read_tensor(&self.root.join(file), gold.sequence_length, &features))
            .collect::<Result<Vec<_>>>()?;
        Ok(GoldArtifacts {
            batch: gold,
            tensors,
        })
    }

    pub fn list_batches(&self, symbol: &str) -> Result<Vec<GoldBatch>> {
        self.catalog.read(|conn| batch::list_batches(conn, symbol))
    }

    pub fn normalization(
        &self,
        symbol: &str,
        contract: &ContractId,
        which: ParamVersion,
    ) -> Result<Option<StoredNormalization>> {
        self.catalog
            .read(|conn| batch::load_params(conn, symbol, contract, which))
    }

    /// Every saved parameter version for (symbol, contract), oldest first.
    pub fn normalization_history(
        &self,
        symbol: &str,
        contract: &ContractId,
    ) -> Result<Vec<StoredNormalization>> {
        self.catalog
            .read(|conn| batch::list_params(conn, symbol, contract))
    }

    /// Make an earlier parameter version current again.
    pub fn pin_normalization(&self, symbol: &str, contract: &ContractId, version: u32) -> Result<()> {
        let found = self
            .catalog
            .write(|tx| batch::set_current(tx, symbol, contract, version))?;
        if !found {
            return Err(Error::MissingNormalization {
                symbol: symbol.to_string(),
                contract: format!("{contract} (version {version})"),
            });
        }
        info!(symbol, contract = %contract, version, "normalization pointer moved");
        Ok(())
    }

    fn check_registered(&self, contract: &FeatureContract) -> Result<()> {
        let stored = self
            .catalog
            .read(|conn| batch::stored_fingerprint(conn, &contract.id()))?;
        match stored {
            Some(fp) if fp != contract.fingerprint()? => Err(Error::ContractMismatch {
                contract: contract.id().to_string(),
                reason: "definition differs from the one used for training".into(),
            }),
            _ => Ok(()),
        }
    }

    fn require_params(
        &self,
        symbol: &str,
        contract: &FeatureContract,
        which: ParamVersion,
    ) -> Result<StoredNormalization> {
        let id = contract.id();
        let stored = self
            .normalization(symbol, &id, which)?
            .ok_or_else(|| Error::MissingNormalization {
                symbol: symbol.to_string(),
                contract: match which {
                    ParamVersion::Current => id.to_string(),
                    ParamVersion::Pinned(v) => format!("{id} (version {v})"),
                },
            })?;
        stored.params.check_contract(contract)?;
        Ok(stored)
    }

    #[allow(clippy::too_many_arguments)]
    fn new_batch(
        &self,
        batch_id: String,
        symbol: &str,
        silver_batch_id: Option<&str>,
        contract: &FeatureContract,
        rows: &Frame,
        selection: &Selection,
        normalization: NormalizationParams,
        created_at: DateTime<Utc>,
    ) -> Result<GoldBatch> {
        let (start_date, end_date) = match (rows.first_date(), rows.last_date()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(SchemaError::Empty.into()),
        };
        Ok(GoldBatch {
            batch_id,
            symbol: symbol.to_string(),
            silver_batch_id: silver_batch_id.map(str::to_string),
            contract_name: contract.name.clone(),
            contract_version: contract.version.clone(),
            samples: 0,
            num_features: contract.num_features(),
            sequence_length: contract.sequence_length,
            normalization,
            normalization_version: 0,
            start_date,
            end_date,
            substituted_features: selection.substituted.clone(),
            range_warnings: selection.range_warnings.clone(),
            split: None,
            tensor_files: Vec::new(),
            created_at,
        })
    }

    /// Catalog the batch (and, when fitted, its parameters as a new current
    /// version) in one transaction, then write the JSON sidecar.
    fn persist(
        &self,
        gold: &mut GoldBatch,
        contract: &FeatureContract,
        fitted: bool,
        loaded_version: Option<u32>,
    ) -> Result<()> {
        let id = contract.id();
        let recorded = self.catalog.write(|tx| {
            gold.normalization_version = match loaded_version {
                Some(v) if !fitted => v,
                _ => batch::save_params(
                    tx,
                    &gold.symbol,
                    &id,
                    &gold.normalization,
                    &gold.batch_id,
                    gold.created_at,
                )?,
            };
            batch::insert_batch(tx, gold)
        });
        if let Err(err) = recorded {
            for file in &gold.tensor_files {
                storage::discard(&self.root.join(file));
            }
            return Err(err);
        }

        let sidecar = self.root.join(artifact_dir(&gold.symbol)).join(format!("{}.json", gold.batch_id));
        artifact::write_sidecar(&sidecar, gold, contract)?;

        info!(
            symbol = gold.symbol.as_str(),
            batch_id = %gold.batch_id,
            contract = %id,
            samples = gold.samples,
            normalization_version = gold.normalization_version,
            fitted,
            substituted = gold.substituted_features.len(),
            "gold batch written"
        );
        Ok(())
    }
}

fn artifact_dir(symbol: &str) -> PathBuf {
    PathBuf::from("ml_ready").join(format!("symbol={symbol}"))
}
