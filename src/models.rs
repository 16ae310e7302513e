use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One of the six fixed categorical axes of a token's composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraitDimension {
    Head,
    Body,
    Prop,
    Familiar,
    Rune,
    Background,
}

impl TraitDimension {
    pub const ALL: [TraitDimension; 6] = [
        TraitDimension::Head,
        TraitDimension::Body,
        TraitDimension::Prop,
        TraitDimension::Familiar,
        TraitDimension::Rune,
        TraitDimension::Background,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TraitDimension::Head => "head",
            TraitDimension::Body => "body",
            TraitDimension::Prop => "prop",
            TraitDimension::Familiar => "familiar",
            TraitDimension::Rune => "rune",
            TraitDimension::Background => "background",
        }
    }

    /// Matches an attribute or column name, ignoring case and surrounding whitespace.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|dim| dim.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for TraitDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute value as delivered by the provider: either text or a JSON number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    return write!(f, "{}", n);
                }
                // Integral floats render without a trailing ".0".
                match n.as_f64() {
                    Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => write!(f, "{:.0}", v),
                    _ => write!(f, "{}", n),
                }
            }
        }
    }
}

/// Canonical attribute: a trait name and its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttributeValue,
}

/// Output of the attribute extractor. `token_id` is always a base-10 numeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_id: String,
    pub attributes: Vec<Attribute>,
}

/// Burn sequence read from a source-population token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnOrderEntry {
    pub token_id: String,
    pub burn_sequence: i64,
}

/// Original vs. post-burn population of one trait value.
///
/// Field names on the wire match the JSON consumed by existing front-ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitStatistic {
    #[serde(rename = "type")]
    pub dimension: TraitDimension,
    #[serde(rename = "name")]
    pub value: String,
    #[serde(rename = "old")]
    pub original_count: u32,
    #[serde(rename = "new")]
    pub current_count: u32,
    /// `original_count - current_count`; never negative since current is a subset of original.
    #[serde(rename = "diff")]
    pub count_delta: u32,
    #[serde(rename = "wizards")]
    pub holder_token_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTokenDetail {
    #[serde(rename = "name")]
    pub display_name: String,
    pub traits: BTreeMap<String, String>,
}

/// The aggregate published by the result cache. Replaced wholesale, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsDocument {
    #[serde(rename = "traits")]
    pub trait_stats: Vec<TraitStatistic>,
    #[serde(rename = "burned")]
    pub burned_count: u32,
    #[serde(rename = "flames")]
    pub remaining_count: i64,
    #[serde(rename = "order")]
    pub burn_order: Vec<String>,
    #[serde(rename = "souls")]
    pub source_population_detail: BTreeMap<String, SourceTokenDetail>,
}
