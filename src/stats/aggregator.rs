//! Stats Aggregator
//!
//! One aggregation pass:
//! 1. scan the source population for display names, trait values and burn sequences
//! 2. fetch derived-population metadata for every burned token and index holders by trait
//! 3. tally original and surviving counts from the reference dataset
//! 4. assemble the statistics document
//!
//! Steps 1, 2 and 4 are pure functions over already-fetched records so they can
//! be exercised without a provider.

use super::cache::StatsSource;
use crate::extract::{display_name, extract_attributes, extract_token_id};
use crate::models::{
    AttributeValue, BurnOrderEntry, SourceTokenDetail, StatisticsDocument, TraitDimension,
    TraitStatistic,
};
use crate::reference::ReferenceDataset;
use crate::scrapers::collection::{CollectionFetcher, SoftError};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use icu_collator::{Collator, CollatorOptions, Strength};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Collection whose tokens carry the burn-order attribute.
    pub source_contract: String,
    /// Collection holding the re-minted tokens.
    pub derived_contract: String,
    /// Total supply of the derived population.
    pub collection_size: u32,
    pub reference_path: PathBuf,
}

/// Everything learned from the source population.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceScan {
    pub details: BTreeMap<String, SourceTokenDetail>,
    /// Feed order; a token seen twice keeps its first position and its last sequence.
    pub burn_entries: Vec<BurnOrderEntry>,
    pub skipped_records: usize,
}

impl SourceScan {
    pub fn from_records(records: &[Value]) -> Self {
        let mut scan = SourceScan::default();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for record in records {
            let Some(token_id) = extract_token_id(record) else {
                let keys: Vec<&str> = record
                    .as_object()
                    .map(|o| o.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                warn!(?keys, "skipping source record without a token id");
                scan.skipped_records += 1;
                continue;
            };

            let mut detail = SourceTokenDetail {
                display_name: display_name(record),
                traits: BTreeMap::new(),
            };

            for attr in extract_attributes(record) {
                if is_burn_order_name(&attr.name) {
                    match burn_sequence(&attr.value) {
                        Some(burn_sequence) => match positions.get(&token_id) {
                            Some(&idx) => scan.burn_entries[idx].burn_sequence = burn_sequence,
                            None => {
                                positions.insert(token_id.clone(), scan.burn_entries.len());
                                scan.burn_entries.push(BurnOrderEntry {
                                    token_id: token_id.clone(),
                                    burn_sequence,
                                });
                            }
                        },
                        None => warn!(
                            token_id = %token_id,
                            value = %attr.value,
                            "could not convert burn order value to an integer"
                        ),
                    }
                } else if let Some(dim) = TraitDimension::from_name(&attr.name) {
                    detail
                        .traits
                        .insert(dim.as_str().to_string(), attr.value.to_string());
                }
            }

            scan.details.insert(token_id, detail);
        }

        scan
    }

    /// Burned token ids in feed order.
    pub fn burned_ids(&self) -> Vec<String> {
        self.burn_entries.iter().map(|e| e.token_id.clone()).collect()
    }

    /// Token ids ordered by descending burn sequence; ties keep feed order.
    pub fn burn_order(&self) -> Vec<String> {
        let mut entries: Vec<&BurnOrderEntry> = self.burn_entries.iter().collect();
        entries.sort_by(|a, b| b.burn_sequence.cmp(&a.burn_sequence));
        entries.into_iter().map(|e| e.token_id.clone()).collect()
    }
}

/// Reverse index from `(dimension, value)` to derived token ids, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HolderIndex {
    holders: HashMap<(TraitDimension, String), Vec<String>>,
    pub indexed_tokens: usize,
}

impl HolderIndex {
    pub fn from_records(records: &[Value]) -> Self {
        let mut index = HolderIndex::default();
        for record in records {
            let Some(token_id) = extract_token_id(record) else {
                debug!("skipping derived record without a token id");
                continue;
            };
            index.indexed_tokens += 1;
            for attr in extract_attributes(record) {
                let Some(dim) = TraitDimension::from_name(&attr.name) else {
                    continue;
                };
                let ids = index
                    .holders
                    .entry((dim, attr.value.to_string()))
                    .or_default();
                if !ids.contains(&token_id) {
                    ids.push(token_id.clone());
                }
            }
        }
        index
    }

    pub fn holders(&self, dimension: TraitDimension, value: &str) -> &[String] {
        self.holders
            .get(&(dimension, value.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Builds per-value statistics from the reference rows, sorted by value name.
pub fn trait_statistics(
    reference: &ReferenceDataset,
    burned: &HashSet<String>,
    holders: &HolderIndex,
) -> Result<Vec<TraitStatistic>> {
    let collator = value_collator()?;

    // Per dimension, values in first-seen order with (original, current) counts.
    let mut tallies: BTreeMap<TraitDimension, Vec<(String, u32, u32)>> = BTreeMap::new();
    let mut positions: HashMap<(TraitDimension, &str), usize> = HashMap::new();

    for row in reference.rows() {
        let survived = !burned.contains(&row.token_id);
        for (&dim, value) in &row.trait_values {
            let values = tallies.entry(dim).or_default();
            let idx = *positions.entry((dim, value.as_str())).or_insert_with(|| {
                values.push((value.clone(), 0, 0));
                values.len() - 1
            });
            values[idx].1 += 1;
            if survived {
                values[idx].2 += 1;
            }
        }
    }

    let mut stats: Vec<TraitStatistic> = tallies
        .into_iter()
        .flat_map(|(dim, values)| {
            values
                .into_iter()
                .map(move |(value, original, current)| (dim, value, original, current))
        })
        .map(|(dim, value, original_count, current_count)| TraitStatistic {
            dimension: dim,
            holder_token_ids: holders.holders(dim, &value).to_vec(),
            value,
            original_count,
            current_count,
            count_delta: original_count - current_count,
        })
        .collect();

    stats.sort_by(|a, b| collator.compare(&a.value, &b.value));
    Ok(stats)
}

/// Root-locale collator at tertiary strength: accents and case only separate
/// names that are otherwise equal, lower case first. Identical names compare
/// equal, so a stable sort keeps their input order.
pub fn value_collator() -> Result<Collator> {
    let mut options = CollatorOptions::new();
    options.strength = Some(Strength::Tertiary);
    Collator::try_new(&Default::default(), options)
        .map_err(|e| anyhow!("failed to build value collator: {e:?}"))
}

/// Puts together the document from the pieces of a pass.
pub fn assemble(
    scan: SourceScan,
    holders: &HolderIndex,
    reference: &ReferenceDataset,
    collection_size: u32,
) -> Result<StatisticsDocument> {
    let burned: HashSet<String> = scan.burn_entries.iter().map(|e| e.token_id.clone()).collect();
    let burned_count = burned.len() as u32;

    Ok(StatisticsDocument {
        trait_stats: trait_statistics(reference, &burned, holders)?,
        burned_count,
        remaining_count: i64::from(collection_size) - i64::from(burned_count),
        burn_order: scan.burn_order(),
        source_population_detail: scan.details,
    })
}

fn is_burn_order_name(name: &str) -> bool {
    let normalized = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    normalized == "burn order" || normalized == "burnorder"
}

fn burn_sequence(value: &AttributeValue) -> Option<i64> {
    match value {
        AttributeValue::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|v| v.is_finite() && v.abs() < i64::MAX as f64)
                .map(|v| v.trunc() as i64)
        }),
        AttributeValue::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                // "5.0" counts, "5.5" does not.
                s.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64)
                    .map(|v| v as i64)
            })
        }
    }
}

fn log_soft_errors(stage: &str, errors: &[SoftError]) {
    for err in errors {
        warn!(stage, error = %err, "fetch degraded");
    }
}

pub struct StatsAggregator {
    fetcher: CollectionFetcher,
    config: AggregatorConfig,
}

impl StatsAggregator {
    pub fn new(fetcher: CollectionFetcher, config: AggregatorConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Runs a full pass. Network trouble degrades the result; a reference dataset
    /// that cannot be read aborts it.
    pub async fn run_pass(&self) -> Result<StatisticsDocument> {
        let started = Instant::now();

        info!(contract = %self.config.source_contract, "fetching source population");
        let source = self
            .fetcher
            .fetch_full_collection(&self.config.source_contract)
            .await;
        log_soft_errors("source collection", &source.soft_errors);

        let scan = SourceScan::from_records(&source.items);
        let burned_ids = scan.burned_ids();
        info!(
            fetched = source.items.len(),
            skipped = scan.skipped_records,
            burned = burned_ids.len(),
            "processed source population"
        );

        info!(
            contract = %self.config.derived_contract,
            tokens = burned_ids.len(),
            "fetching burned tokens from derived population"
        );
        let derived = self
            .fetcher
            .fetch_metadata(&self.config.derived_contract, &burned_ids)
            .await;
        log_soft_errors("derived metadata", &derived.soft_errors);
        let holders = HolderIndex::from_records(&derived.items);

        let reference = ReferenceDataset::load(&self.config.reference_path).await?;

        let soft_errors = source.soft_errors.len() + derived.soft_errors.len();
        let document = assemble(scan, &holders, &reference, self.config.collection_size)?;

        info!(
            burned = document.burned_count,
            remaining = document.remaining_count,
            derived_indexed = holders.indexed_tokens,
            reference_rows = reference.len(),
            trait_values = document.trait_stats.len(),
            soft_errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aggregation pass complete"
        );

        Ok(document)
    }
}

#[async_trait]
impl StatsSource for StatsAggregator {
    async fn compute(&self) -> Result<StatisticsDocument> {
        self.run_pass().await
    }
}
