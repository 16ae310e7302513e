//! Reference dataset: the pre-burn trait assignment of every originally minted token.
//!
//! Read fresh on every aggregation pass. Unlike the network paths there is no
//! degraded mode here; a missing or malformed file aborts the pass.

use crate::models::TraitDimension;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub const TOKEN_ID_COLUMN: &str = "token_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRow {
    pub token_id: String,
    /// Only dimensions whose cell was non-empty.
    pub trait_values: BTreeMap<TraitDimension, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceDataset {
    rows: Vec<ReferenceRow>,
}

impl ReferenceDataset {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read reference dataset {}", path.display()))?;
        let dataset = Self::parse(&bytes)
            .with_context(|| format!("Failed to parse reference dataset {}", path.display()))?;
        debug!(path = %path.display(), rows = dataset.len(), "reference dataset loaded");
        Ok(dataset)
    }

    /// Parses a header-led CSV byte stream. Blank lines are skipped; ragged rows are an error.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers = reader.headers().context("Failed to read header row")?.clone();
        let Some(token_col) = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(TOKEN_ID_COLUMN))
        else {
            bail!("header row has no `{}` column", TOKEN_ID_COLUMN);
        };
        let dimension_cols: Vec<(usize, TraitDimension)> = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| TraitDimension::from_name(h).map(|dim| (i, dim)))
            .collect();

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            // +2: one for the header, one for 1-based numbering.
            let record = record.with_context(|| format!("Malformed row {}", line + 2))?;
            let token_id = record.get(token_col).unwrap_or_default().to_string();
            let trait_values = dimension_cols
                .iter()
                .filter_map(|&(col, dim)| {
                    record
                        .get(col)
                        .filter(|cell| !cell.is_empty())
                        .map(|cell| (dim, cell.to_string()))
                })
                .collect();
            rows.push(ReferenceRow {
                token_id,
                trait_values,
            });
        }

        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[ReferenceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows with a non-empty cell for `dimension`.
    pub fn coverage(&self, dimension: TraitDimension) -> usize {
        self.rows
            .iter()
            .filter(|row| row.trait_values.contains_key(&dimension))
            .count()
    }
}
