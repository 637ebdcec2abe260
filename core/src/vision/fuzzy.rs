//! Ratcliff/Obershelp similarity for correcting misread labels.

/// `2 * matches / (len(a) + len(b))`, 1.0 for two empty strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// Highest scoring candidate at or above `cutoff`; equal scores go to the
/// lexically greater candidate.
pub fn closest_match<'a>(text: &str, candidates: &'a [String], cutoff: f64) -> Option<&'a str> {
    candidates
        .iter()
        .map(|candidate| (similarity(text, candidate), candidate))
        .filter(|(score, _)| *score >= cutoff)
        .max_by(|(sa, a), (sb, b)| sa.total_cmp(sb).then_with(|| a.cmp(b)))
        .map(|(_, candidate)| candidate.as_str())
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, k) = longest_common_block(a, b);
    if k == 0 {
        return 0;
    }
    k + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + k..], &b[j + k..])
}

/// Longest common substring; the earliest one in `a`, then in `b`, wins.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut previous = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let length = previous[j] + 1;
                current[j + 1] = length;
                if length > best.2 {
                    best = (i + 1 - length, j + 1 - length, length);
                }
            }
        }
        previous = current;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_counts_recursive_matches() {
        assert_eq!(similarity("TEST", "TEST"), 1.0);
        assert_eq!(similarity("TE5T", "TEST"), 0.75);
        assert_eq!(similarity("abcd", "bcde"), 0.75);
        assert_eq!(similarity("", "ABC"), 0.0);
    }

    #[test]
    fn closest_match_honors_cutoff() {
        let known: Vec<String> = ["TEST", "AYD", "CRB", "MUS", "SHN"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(closest_match("TE5T", &known, 0.7), Some("TEST"));
        assert_eq!(closest_match("MU5", &known, 0.7), None);
        assert_eq!(closest_match("SHN", &known, 0.7), Some("SHN"));
        assert_eq!(closest_match("zzz", &known, 0.7), None);
    }

    #[test]
    fn ties_prefer_the_greater_candidate() {
        let known = vec!["AB".to_string(), "AC".to_string()];
        assert_eq!(closest_match("A", &known, 0.5), Some("AC"));
    }
}
