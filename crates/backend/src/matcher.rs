//! Case-insensitive whole-word matching of target words.

use regex::Regex;

/// Matches a fixed, ordered list of target words against lines of text.
///
/// A match must sit on word boundaries on both sides, so `Go` does not
/// match inside `Golang`. Patterns are compiled once and reused for every
/// line a worker handles.
#[derive(Debug, Clone)]
pub struct WordMatcher {
  patterns: Vec<(String, Regex)>,
}

impl WordMatcher {
  pub fn new(words: &[String]) -> Result<Self, regex::Error> {
    let patterns = words
      .iter()
      .map(|word| {
        let pattern = format!(r"(?i)\b{}\b", regex::escape(word));
        Regex::new(&pattern).map(|re| (word.clone(), re))
      })
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { patterns })
  }

  /// One entry per occurrence, in target-list order.
  ///
  /// A word listed twice in the target list yields its occurrences twice.
  pub fn occurrences<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    self
      .patterns
      .iter()
      .flat_map(move |(word, re)| re.find_iter(text).map(move |_| word.as_str()))
  }
}
