//! Domain types shared by every pipeline component.
//!
//! These are the logical message shapes (a line of work, a single matched
//! occurrence) and the rule that splits a file between producers. They carry
//! no transport concerns; the backend decides how they travel.

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

// ============================================================================
// Messages
// ============================================================================

/// One line of the input file, published by a producer onto the work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
  /// 1-based position of the line in the file
  pub line_number: u64,
  pub text: String,
}

impl WorkItem {
  pub fn new(line_number: u64, text: impl Into<String>) -> Self {
    Self {
      line_number,
      text: text.into(),
    }
  }
}

/// One matched occurrence of a target word, published onto the result topic.
///
/// A line containing a word three times produces three events with
/// `count = 1`, never one event with `count = 3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceEvent {
  pub term: String,
  pub count: u64,
  pub source_worker_id: usize,
}

impl OccurrenceEvent {
  /// A single occurrence of `term` found by `worker_id`.
  pub fn single(term: impl Into<String>, worker_id: usize) -> Self {
    Self {
      term: term.into(),
      count: 1,
      source_worker_id: worker_id,
    }
  }
}

// ============================================================================
// Partitioning
// ============================================================================

/// Assignment of file lines to one producer.
///
/// Line `n` (1-based) belongs to partition `(n - 1) % count`. For a fixed
/// `count`, the partitions `0..count` are pairwise disjoint and together
/// cover every line exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionSpec {
  pub index: usize,
  pub count: usize,
}

impl PartitionSpec {
  /// Build a partition, rejecting an empty family or an out-of-range index.
  pub fn new(index: usize, count: usize) -> Result<Self, ConfigError> {
    if count == 0 {
      return Err(ConfigError::InvalidPartitionCount(count));
    }
    if index >= count {
      return Err(ConfigError::InvalidPartition(format!("{}/{}", index, count)));
    }
    Ok(Self { index, count })
  }

  /// Lines 1, 3, 5, ...
  pub fn odd() -> Self {
    Self { index: 0, count: 2 }
  }

  /// Lines 2, 4, 6, ...
  pub fn even() -> Self {
    Self { index: 1, count: 2 }
  }

  /// The complete family of `count` partitions.
  pub fn all(count: usize) -> Result<Vec<Self>, ConfigError> {
    if count == 0 {
      return Err(ConfigError::InvalidPartitionCount(count));
    }
    Ok((0..count).map(|index| Self { index, count }).collect())
  }

  /// Whether the 1-based `line_number` falls in this partition.
  ///
  /// Line 0 does not exist and is never selected.
  pub fn selects(&self, line_number: u64) -> bool {
    line_number > 0 && ((line_number - 1) % self.count as u64) == self.index as u64
  }
}

impl fmt::Display for PartitionSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.index, self.count) {
      (0, 2) => write!(f, "odd lines"),
      (1, 2) => write!(f, "even lines"),
      (_, 1) => write!(f, "all lines"),
      (index, count) => write!(f, "partition {}/{}", index, count),
    }
  }
}

impl FromStr for PartitionSpec {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "odd" => Ok(Self::odd()),
      "even" => Ok(Self::even()),
      other => {
        let Some((index, count)) = other.split_once('/') else {
          return Err(ConfigError::InvalidPartition(s.to_string()));
        };
        let index = index
          .trim()
          .parse()
          .map_err(|_| ConfigError::InvalidPartition(s.to_string()))?;
        let count = count
          .trim()
          .parse()
          .map_err(|_| ConfigError::InvalidPartition(s.to_string()))?;
        Self::new(index, count)
      }
    }
  }
}

// ============================================================================
// Run request
// ============================================================================

/// Parse a comma-separated word list.
///
/// Entries are trimmed and empty entries dropped. Order and duplicates are
/// preserved: a word listed twice is matched (and counted) twice.
pub fn parse_target_words(csv: &str) -> Vec<String> {
  csv
    .split(',')
    .map(str::trim)
    .filter(|w| !w.is_empty())
    .map(String::from)
    .collect()
}

/// A validated request to run the pipeline once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
  pub file: PathBuf,
  pub words: Vec<String>,
  pub workers: usize,
  pub partitions: Vec<PartitionSpec>,
}

impl RunRequest {
  /// Words with duplicates removed, in first-seen order.
  ///
  /// Used to seed the aggregate so that every requested word is displayed
  /// even before it is seen.
  pub fn distinct_words(&self) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    self.words.iter().filter(|w| seen.insert(w.as_str())).cloned().collect()
  }
}
