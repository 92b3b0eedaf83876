//! Launcher-style rank lists such as `0,2,5-7,9`.

use std::collections::BTreeSet;

use metrics_store::Rank;

use crate::Error;

/// Parses a comma separated list of ranks and inclusive `first-last` ranges.
///
/// Empty items are skipped, so `""` yields an empty selection.
///
/// ```
/// use multiprog::parse_rank_list;
///
/// let ranks = parse_rank_list("0,2,5-7,9").unwrap();
/// assert_eq!(ranks.into_iter().collect::<Vec<_>>(), vec![0, 2, 5, 6, 7, 9]);
/// ```
pub fn parse_rank_list(list: &str) -> Result<BTreeSet<Rank>, Error> {
    let invalid = |reason: String| Error::InvalidRankList {
        list: list.to_string(),
        reason,
    };
    let parse_rank = |token: &str| {
        token
            .trim()
            .parse::<Rank>()
            .map_err(|e| invalid(format!("bad rank {:?}: {}", token.trim(), e)))
    };

    let mut ranks = BTreeSet::new();
    for item in list.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        match item.split_once('-') {
            Some((first, last)) => {
                let (first, last) = (parse_rank(first)?, parse_rank(last)?);
                if first > last {
                    return Err(invalid(format!("range {}-{} is reversed", first, last)));
                }
                ranks.extend(first..=last);
            }
            None => {
                ranks.insert(parse_rank(item)?);
            }
        }
    }

    Ok(ranks)
}
