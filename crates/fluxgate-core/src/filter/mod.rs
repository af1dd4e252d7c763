//! Log filter normalization and bounds checking.
//!
//! A filter selects logs by exactly one of three modes: an epoch range (the default), a block
//! range, or a set of block hashes. [`LogFilterValidator`] rejects filters that mix modes or
//! exceed the configured limits before any store or node sees them. Epoch-range filters are
//! normalized in place: missing bounds become `latest_checkpoint` / `latest_state`, and tags
//! are resolved to numbers where the node can answer.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::{
    node::EpochResolver,
    types::{parse_quantity, Epoch},
};

const EPOCH_RANGE: u8 = 0b001;
const BLOCK_RANGE: u8 = 0b010;
const BLOCK_HASHES: u8 = 0b100;

/// Limits applied to every log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterLimits {
    pub max_block_hashes: usize,
    pub max_block_range: u64,
    pub max_epoch_range: u64,
    pub max_limit: u64,
}

impl Default for FilterLimits {
    fn default() -> Self {
        Self { max_block_hashes: 128, max_block_range: 1000, max_epoch_range: 1000, max_limit: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("invalid filter parameter: only one of epoch range, block range or block hashes may be set")]
    InvalidFilterParameter,

    #[error("block hashes exceed maximum value {0}")]
    TooManyBlockHashes(usize),

    #[error("invalid block range (from block or to block missing)")]
    MissingBlockBound,

    #[error("invalid block range (from block larger than to block)")]
    InvertedBlockRange,

    #[error("block range exceeds maximum value {0}")]
    BlockRangeTooLarge(u64),

    #[error("invalid epoch range (from epoch larger than to epoch)")]
    InvertedEpochRange,

    #[error("epoch range exceeds maximum value {0}")]
    EpochRangeTooLarge(u64),

    #[error("limit field exceed the maximum value {0}")]
    LimitTooLarge(u64),
}

impl FilterError {
    /// True for filters that are well formed but ask for too much.
    #[must_use]
    pub fn is_range_too_large(&self) -> bool {
        matches!(
            self,
            Self::TooManyBlockHashes(_) |
                Self::BlockRangeTooLarge(_) |
                Self::EpochRangeTooLarge(_) |
                Self::LimitTooLarge(_)
        )
    }
}

/// A `0x`-hex quantity that also accepts plain JSON numbers on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quantity(pub u64);

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:#x}", self.0))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => {
                n.as_u64().map(Quantity).ok_or_else(|| de::Error::custom("invalid quantity"))
            }
            Value::String(s) => parse_quantity(&s)
                .map(Quantity)
                .ok_or_else(|| de::Error::custom(format!("invalid quantity: {s}"))),
            other => Err(de::Error::custom(format!("invalid quantity: {other}"))),
        }
    }
}

/// Block bound of a block-range filter: a number, or a tag the node interprets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockNumber {
    Number(u64),
    Tag(String),
}

impl BlockNumber {
    #[must_use]
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Tag(_) => None,
        }
    }
}

impl Serialize for BlockNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => serializer.collect_str(&format_args!("{n:#x}")),
            Self::Tag(tag) => serializer.serialize_str(tag),
        }
    }
}

impl<'de> Deserialize<'de> for BlockNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => {
                n.as_u64().map(Self::Number).ok_or_else(|| de::Error::custom("invalid block number"))
            }
            Value::String(s) => Ok(parse_quantity(&s).map_or(Self::Tag(s), Self::Number)),
            other => Err(de::Error::custom(format!("invalid block number: {other}"))),
        }
    }
}

/// Log filter as sent by callers. Fields the gateway does not interpret are kept in `extra`
/// and forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_epoch: Option<Epoch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_epoch: Option<Epoch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_block: Option<BlockNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_block: Option<BlockNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hashes: Option<Vec<String>>,
    /// Single-hash form used by `eth_getLogs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<Quantity>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Which selection mode a validated filter uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    EpochRange,
    BlockRange,
    BlockHashes,
}

impl LogFilter {
    /// Bitwise presence flags over the three selection modes.
    #[must_use]
    pub fn presence(&self) -> u8 {
        let mut flags = 0;
        if self.from_epoch.is_some() || self.to_epoch.is_some() {
            flags |= EPOCH_RANGE;
        }
        if self.from_block.is_some() || self.to_block.is_some() {
            flags |= BLOCK_RANGE;
        }
        if self.block_hashes.as_ref().is_some_and(|h| !h.is_empty()) || self.block_hash.is_some() {
            flags |= BLOCK_HASHES;
        }
        flags
    }

    /// Mode of the filter; epoch range when nothing is set.
    #[must_use]
    pub fn mode(&self) -> FilterMode {
        let flags = self.presence();
        if flags & BLOCK_HASHES != 0 {
            FilterMode::BlockHashes
        } else if flags & BLOCK_RANGE != 0 {
            FilterMode::BlockRange
        } else {
            FilterMode::EpochRange
        }
    }

    /// True when the selected range is pinned by numbers or hashes, so the answer cannot
    /// move with the chain head. Tags and missing bounds are left to the node.
    #[must_use]
    pub fn has_fixed_bounds(&self) -> bool {
        match self.mode() {
            FilterMode::BlockHashes => true,
            FilterMode::BlockRange => {
                matches!(
                    (&self.from_block, &self.to_block),
                    (Some(BlockNumber::Number(_)), Some(BlockNumber::Number(_)))
                )
            }
            FilterMode::EpochRange => {
                matches!(
                    (self.from_epoch, self.to_epoch),
                    (Some(Epoch::Number(_)), Some(Epoch::Number(_)))
                )
            }
        }
    }

    fn block_hash_count(&self) -> usize {
        self.block_hashes.as_ref().map_or(0, Vec::len) + usize::from(self.block_hash.is_some())
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EpochRange => "epoch_range",
            Self::BlockRange => "block_range",
            Self::BlockHashes => "block_hashes",
        })
    }
}

/// Checks log filters against [`FilterLimits`].
#[derive(Debug, Clone, Default)]
pub struct LogFilterValidator {
    limits: FilterLimits,
}

impl LogFilterValidator {
    #[must_use]
    pub fn new(limits: FilterLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> &FilterLimits {
        &self.limits
    }

    /// Validates a `cfx_getLogs` filter, normalizing its epoch range in place.
    ///
    /// # Errors
    ///
    /// Returns the first [`FilterError`] the filter violates.
    pub async fn validate(
        &self,
        filter: &mut LogFilter,
        resolver: &dyn EpochResolver,
    ) -> Result<(), FilterError> {
        let flags = filter.presence();
        if flags.count_ones() > 1 {
            return Err(FilterError::InvalidFilterParameter);
        }

        if flags & BLOCK_HASHES != 0 {
            self.check_block_hashes(filter)?;
        } else if flags & BLOCK_RANGE != 0 {
            self.check_block_range(filter, true)?;
        } else {
            normalize_epoch_range(filter, resolver).await;
            self.check_epoch_range(filter)?;
        }

        self.check_limit(filter)
    }

    /// Validates an `eth_getLogs` filter. Block tags are left for the node to interpret.
    ///
    /// # Errors
    ///
    /// Returns the first [`FilterError`] the filter violates.
    pub fn validate_eth(&self, filter: &LogFilter) -> Result<(), FilterError> {
        let flags = filter.presence();
        if flags.count_ones() > 1 || flags & EPOCH_RANGE != 0 {
            return Err(FilterError::InvalidFilterParameter);
        }

        if flags & BLOCK_HASHES != 0 {
            self.check_block_hashes(filter)?;
        } else if flags & BLOCK_RANGE != 0 {
            self.check_block_range(filter, false)?;
        }

        self.check_limit(filter)
    }

    fn check_block_hashes(&self, filter: &LogFilter) -> Result<(), FilterError> {
        if filter.block_hash_count() > self.limits.max_block_hashes {
            return Err(FilterError::TooManyBlockHashes(self.limits.max_block_hashes));
        }
        Ok(())
    }

    fn check_block_range(&self, filter: &LogFilter, both_required: bool) -> Result<(), FilterError> {
        let (from, to) = match (&filter.from_block, &filter.to_block) {
            (Some(from), Some(to)) => (from.as_number(), to.as_number()),
            _ if both_required => return Err(FilterError::MissingBlockBound),
            _ => return Ok(()),
        };

        if let (Some(from), Some(to)) = (from, to) {
            check_span(
                from,
                to,
                self.limits.max_block_range,
                FilterError::InvertedBlockRange,
                FilterError::BlockRangeTooLarge,
            )?;
        }
        Ok(())
    }

    fn check_epoch_range(&self, filter: &LogFilter) -> Result<(), FilterError> {
        let from = filter.from_epoch.as_ref().and_then(Epoch::as_number);
        let to = filter.to_epoch.as_ref().and_then(Epoch::as_number);

        if let (Some(from), Some(to)) = (from, to) {
            check_span(
                from,
                to,
                self.limits.max_epoch_range,
                FilterError::InvertedEpochRange,
                FilterError::EpochRangeTooLarge,
            )?;
        }
        Ok(())
    }

    fn check_limit(&self, filter: &LogFilter) -> Result<(), FilterError> {
        match filter.limit {
            Some(Quantity(limit)) if limit > self.limits.max_limit => {
                Err(FilterError::LimitTooLarge(self.limits.max_limit))
            }
            _ => Ok(()),
        }
    }
}

fn check_span(
    from: u64,
    to: u64,
    max: u64,
    inverted: FilterError,
    too_large: fn(u64) -> FilterError,
) -> Result<(), FilterError> {
    if from > to {
        return Err(inverted);
    }
    // Inclusive span is `to - from + 1`; compared without the `+ 1` so `0..=u64::MAX` fits.
    if to - from >= max {
        return Err(too_large(max));
    }
    Ok(())
}

/// Fills missing epoch bounds and resolves tags that the node can answer. Unresolvable tags
/// stay as they are.
async fn normalize_epoch_range(filter: &mut LogFilter, resolver: &dyn EpochResolver) {
    let from = filter.from_epoch.unwrap_or(Epoch::LATEST_CHECKPOINT);
    let to = filter.to_epoch.unwrap_or(Epoch::LATEST_STATE);

    filter.from_epoch = Some(resolver.resolve(&from).await.map_or(from, Epoch::Number));
    filter.to_epoch = Some(resolver.resolve(&to).await.map_or(to, Epoch::Number));
}
