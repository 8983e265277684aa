//! SQL `LIKE` pattern matching: `%` matches zero or more characters, `_`
//! matches exactly one. Recursive with backtracking, case-sensitive (§4.7).
//! Not grounded in a specific teacher file (the teacher's `~` fuzzy-match
//! operator is a different feature); written fresh in the recursive style
//! `sql::operator.rs`'s comparison operators use.

pub fn like_match(s: &str, pattern: &str) -> bool {
	let s: Vec<char> = s.chars().collect();
	let p: Vec<char> = pattern.chars().collect();
	matches(&s, &p)
}

fn matches(s: &[char], p: &[char]) -> bool {
	match p.first() {
		None => s.is_empty(),
		Some('%') => {
			// Zero-or-more: try consuming 0..=len characters of s for this %.
			if matches(s, &p[1..]) {
				return true;
			}
			!s.is_empty() && matches(&s[1..], p)
		}
		Some('_') => !s.is_empty() && matches(&s[1..], &p[1..]),
		Some(c) => s.first() == Some(c) && matches(&s[1..], &p[1..]),
	}
}

#[cfg(test)]
mod tests {
	use super::like_match;

	#[test]
	fn percent_matches_anything() {
		assert!(like_match("anything at all", "%"));
		assert!(like_match("", "%"));
	}

	#[test]
	fn exact_match() {
		assert!(like_match("sensor001", "sensor001"));
	}

	#[test]
	fn underscore_matches_single_char() {
		assert!(like_match("a", "_"));
		assert!(!like_match("ab", "_"));
		assert!(!like_match("", "_"));
	}

	#[test]
	fn prefix_and_suffix_wildcards() {
		assert!(like_match("sensor001", "sensor%"));
		assert!(!like_match("device002", "sensor%"));
		assert!(like_match("xx_middle_xx", "%middle%"));
	}

	#[test]
	fn mixed_wildcards() {
		assert!(like_match("sensor_42", "sensor_%"));
		assert!(like_match("ab", "a_"));
		assert!(!like_match("abc", "a_"));
	}
}
