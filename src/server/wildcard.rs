//! Wildcard name patterns.
//!
//! `*` matches any run of characters (including none), `?` matches exactly
//! one character, and every other character matches itself literally. A
//! pattern must match the whole name.

/// Characters that turn a target into a pattern.
pub const WILDCARD_CHARS: [char; 2] = ['*', '?'];

/// Whether `name` contains wildcard metacharacters.
pub fn is_wildcard(name: &str) -> bool {
    name.contains(WILDCARD_CHARS)
}

/// A compiled wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    chars: Vec<char>,
}

impl WildcardPattern {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Self {
        Self {
            chars: pattern.chars().collect(),
        }
    }

    /// Whether the pattern matches the whole of `name`.
    pub fn matches(&self, name: &str) -> bool {
        let name: Vec<char> = name.chars().collect();
        let pattern = &self.chars;

        let (mut p, mut n) = (0, 0);
        // Position of the last `*` seen and the name position it was tried at.
        let mut star: Option<(usize, usize)> = None;

        while n < name.len() {
            match pattern.get(p) {
                Some('*') => {
                    star = Some((p, n));
                    p += 1;
                }
                Some('?') => {
                    p += 1;
                    n += 1;
                }
                Some(&c) if c == name[n] => {
                    p += 1;
                    n += 1;
                }
                _ => match star {
                    // Let the last star swallow one more character.
                    Some((star_p, star_n)) => {
                        p = star_p + 1;
                        n = star_n + 1;
                        star = Some((star_p, star_n + 1));
                    }
                    None => return false,
                },
            }
        }

        pattern[p..].iter().all(|&c| c == '*')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_wildcard() {
        assert!(is_wildcard("*"));
        assert!(is_wildcard("cam?"));
        assert!(is_wildcard("a*b"));
        assert!(!is_wildcard("camera"));
        assert!(!is_wildcard(""));
    }

    #[test]
    fn test_star_matches_everything() {
        let pattern = WildcardPattern::new("*");
        assert!(pattern.matches(""));
        assert!(pattern.matches("abc"));
        assert!(pattern.matches("anything_at_all"));
    }

    #[test]
    fn test_question_mark_matches_one() {
        let pattern = WildcardPattern::new("ab?");
        assert!(pattern.matches("abc"));
        assert!(pattern.matches("abz"));
        assert!(!pattern.matches("abcd"));
        assert!(!pattern.matches("ab"));
    }

    #[test]
    fn test_star_in_middle() {
        let pattern = WildcardPattern::new("cam*_hd");
        assert!(pattern.matches("cam_hd"));
        assert!(pattern.matches("cam01_hd"));
        assert!(pattern.matches("cam_hd_hd"));
        assert!(!pattern.matches("cam01_sd"));
        assert!(!pattern.matches("xcam01_hd"));
    }

    #[test]
    fn test_combined() {
        let pattern = WildcardPattern::new("?ensor*");
        assert!(pattern.matches("sensor"));
        assert!(pattern.matches("sensor_42"));
        assert!(pattern.matches("tensor"));
        assert!(!pattern.matches("ensor"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = WildcardPattern::new("a.?");
        assert!(pattern.matches("a.c"));
        assert!(!pattern.matches("abc"));

        let pattern = WildcardPattern::new("(x)+*");
        assert!(pattern.matches("(x)+"));
        assert!(pattern.matches("(x)+y"));
        assert!(!pattern.matches("xx"));
    }

    #[test]
    fn test_literal_pattern_is_exact() {
        let pattern = WildcardPattern::new("blue");
        assert!(pattern.matches("blue"));
        assert!(!pattern.matches("blues"));
        assert!(!pattern.matches("blu"));
    }
}
