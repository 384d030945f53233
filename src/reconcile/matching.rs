//! Title matching and reconciliation keys

use crate::plugin::source::Novel;
use serde::{Deserialize, Serialize};

/// The fields of a novel needed to address it on another source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrippedNovel {
    pub title: String,
    pub slug: String,
    pub author: String,
}

impl StrippedNovel {
    /// Strip a novel, taking its primary author or `fallback_author` when it has none
    pub fn from_novel(novel: &Novel, fallback_author: &str) -> Self {
        let author = novel
            .primary_author()
            .map(|a| a.name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or(fallback_author);

        Self {
            title: novel.title.trim().to_string(),
            slug: novel.slug.clone(),
            author: author.to_string(),
        }
    }
}

/// Trimmed, lowercased form used for comparisons and keys
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Exact title equality after trimming, ignoring case
pub fn titles_match(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Cache key of a novel's cross-source matches
pub fn match_key(title: &str, author: &str) -> String {
    format!("novel-match:{}+{}", normalize(title), normalize(author))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_titles_match() {
        assert!(titles_match("Tao Tac", "  tao tac "));
        assert!(titles_match("ĐẠO QUÂN", "đạo quân"));
        assert!(!titles_match("Tao Tac", "Tao Tac 2"));
        assert!(!titles_match("Tao Tac", "TaoTac"));
    }

    #[test]
    fn test_stripped_author_fallback() {
        let with_author = Novel::new(" Tao Tac ", "tao-tac", "p2").with_author("Y");
        let stripped = StrippedNovel::from_novel(&with_author, "X");
        assert_eq!(stripped.title, "Tao Tac");
        assert_eq!(stripped.author, "Y");

        let anonymous = Novel::new("Tao Tac", "tao-tac", "p2");
        assert_eq!(StrippedNovel::from_novel(&anonymous, "X").author, "X");

        let blank = Novel::new("Tao Tac", "tao-tac", "p2").with_author("  ");
        assert_eq!(StrippedNovel::from_novel(&blank, "X").author, "X");
    }

    proptest! {
        #[test]
        fn prop_match_ignores_case_and_padding(title in "[a-zA-Z ]{1,24}", pad in " {0,3}") {
            let padded = format!("{}{}{}", pad, title.to_uppercase(), pad);
            prop_assert!(titles_match(&title, &padded));
        }

        #[test]
        fn prop_match_key_is_normalized(title in "[a-zA-Z0-9 ]{1,24}", author in "[a-zA-Z ]{1,16}") {
            let key = match_key(&title, &author);
            prop_assert_eq!(key.clone(), match_key(&format!(" {} ", title.to_lowercase()), &author.to_uppercase()));
            prop_assert!(key.starts_with("novel-match:"));
        }

        #[test]
        fn prop_distinct_titles_never_match(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
            prop_assume!(a != b);
            prop_assert!(!titles_match(&a, &b));
        }
    }
}
