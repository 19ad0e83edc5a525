//! Chunk-range strings.
//!
//! Update requests report the chunks a client already holds as a
//! compact range string: sorted, comma-separated, with runs of
//! adjacent chunk numbers collapsed to `first-last` (e.g.
//! `"1-5,7,9-10"`).

use crate::{Result, StoreError};

/// Render a set of chunk numbers as a range string.
///
/// Input order does not matter; duplicates collapse.
pub fn chunks_to_range_string(chunks: &[u32]) -> String {
    let mut sorted = chunks.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = String::new();
    let mut i = 0;
    while i < sorted.len() {
        let first = sorted[i];
        let mut last = first;
        while i + 1 < sorted.len() && sorted[i + 1] == last + 1 {
            i += 1;
            last = sorted[i];
        }

        if !out.is_empty() {
            out.push(',');
        }
        if first == last {
            out.push_str(&first.to_string());
        } else {
            out.push_str(&format!("{first}-{last}"));
        }
        i += 1;
    }
    out
}

/// Parse a range string back into sorted chunk numbers.
pub fn range_string_to_chunks(s: &str) -> Result<Vec<u32>> {
    let mut chunks = Vec::new();
    if s.is_empty() {
        return Ok(chunks);
    }

    for part in s.split(',') {
        match part.split_once('-') {
            None => {
                let n: u32 = part
                    .parse()
                    .map_err(|_| StoreError::InvalidRange(s.to_string()))?;
                chunks.push(n);
            }
            Some((first, last)) => {
                let first: u32 = first
                    .parse()
                    .map_err(|_| StoreError::InvalidRange(s.to_string()))?;
                let last: u32 = last
                    .parse()
                    .map_err(|_| StoreError::InvalidRange(s.to_string()))?;
                if last < first {
                    return Err(StoreError::InvalidRange(s.to_string()));
                }
                chunks.extend(first..=last);
            }
        }
    }

    chunks.sort_unstable();
    chunks.dedup();
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_string_rendering() {
        assert_eq!(chunks_to_range_string(&[]), "");
        assert_eq!(chunks_to_range_string(&[7]), "7");
        assert_eq!(chunks_to_range_string(&[1, 2, 3, 4, 5]), "1-5");
        assert_eq!(chunks_to_range_string(&[1, 2, 3, 4, 5, 7, 9, 10]), "1-5,7,9-10");

        // Unsorted input with duplicates.
        assert_eq!(chunks_to_range_string(&[10, 9, 7, 3, 1, 2, 5, 4, 3]), "1-5,7,9-10");
    }

    #[test]
    fn test_range_string_parsing() {
        assert_eq!(range_string_to_chunks("").unwrap(), Vec::<u32>::new());
        assert_eq!(range_string_to_chunks("7").unwrap(), vec![7]);
        assert_eq!(
            range_string_to_chunks("1-5,7,9-10").unwrap(),
            vec![1, 2, 3, 4, 5, 7, 9, 10]
        );
    }

    #[test]
    fn test_range_string_round_trip() {
        let chunks = vec![1, 2, 3, 10, 11, 50, 51, 52, 53, 99];
        let rendered = chunks_to_range_string(&chunks);
        assert_eq!(range_string_to_chunks(&rendered).unwrap(), chunks);
    }

    #[test]
    fn test_malformed_ranges_rejected() {
        assert!(range_string_to_chunks("1-").is_err());
        assert!(range_string_to_chunks("a-5").is_err());
        assert!(range_string_to_chunks("5-1").is_err());
        assert!(range_string_to_chunks("1,,3").is_err());
    }
}
