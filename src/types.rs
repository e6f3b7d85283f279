// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Built-in byte transforms available to `[[stage]] filter = "..."`.
///
/// Each one works per chunk and keeps no state between chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Reverse the bytes of each chunk.
    Reverse,
    Uppercase,
    Lowercase,
    /// Pass bytes through unchanged.
    Identity,
}

impl FilterKind {
    pub fn apply(self, chunk: &[u8]) -> Vec<u8> {
        match self {
            FilterKind::Reverse => chunk.iter().rev().copied().collect(),
            FilterKind::Uppercase => chunk.to_ascii_uppercase(),
            FilterKind::Lowercase => chunk.to_ascii_lowercase(),
            FilterKind::Identity => chunk.to_vec(),
        }
    }
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reverse" => Ok(FilterKind::Reverse),
            "uppercase" => Ok(FilterKind::Uppercase),
            "lowercase" => Ok(FilterKind::Lowercase),
            "identity" => Ok(FilterKind::Identity),
            other => Err(format!(
                "invalid filter: {other} (expected \"reverse\", \"uppercase\", \"lowercase\" or \"identity\")"
            )),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKind::Reverse => "reverse",
            FilterKind::Uppercase => "uppercase",
            FilterKind::Lowercase => "lowercase",
            FilterKind::Identity => "identity",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_flips_whole_chunk() {
        assert_eq!(FilterKind::Reverse.apply(b"Hello World!\n"), b"\n!dlroW olleH");
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(" Uppercase ".parse::<FilterKind>(), Ok(FilterKind::Uppercase));
        assert!("rot13".parse::<FilterKind>().is_err());
    }
}
