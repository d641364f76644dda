//! PubMed query construction.
//!
//! [`QueryBuilder`] writes E-utilities search terms with field tags;
//! [`candidate_queries`] turns a noisy citation title into the ordered list of
//! search strategies the resolver walks through.
//!
//! # Example
//!
//! ```
//! use refharvest::QueryBuilder;
//!
//! let query = QueryBuilder::new()
//!     .title_phrase("long COVID")
//!     .and()
//!     .author("Smith")
//!     .build();
//! assert_eq!(query, "\"long COVID\"[Title] AND \"Smith\"[Author]");
//! ```

/// Builder for PubMed search terms.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    parts: Vec<String>,
}

impl QueryBuilder {
    /// Create a new empty query builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-phrase title search.
    pub fn title_phrase(mut self, text: &str) -> Self {
        self.parts.push(format!("\"{}\"[Title]", text));
        self
    }

    /// Unquoted title search (all words, any order).
    pub fn title_words(mut self, text: &str) -> Self {
        self.parts.push(format!("{}[Title]", text));
        self
    }

    /// Single word in title or abstract.
    pub fn title_abstract(mut self, word: &str) -> Self {
        self.parts.push(format!("{}[Title/Abstract]", word));
        self
    }

    /// Author filter.
    pub fn author(mut self, name: &str) -> Self {
        self.parts.push(format!("\"{}\"[Author]", name));
        self
    }

    /// Publication year filter.
    pub fn year(mut self, year: u16) -> Self {
        self.parts.push(format!("{}[pdat]", year));
        self
    }

    /// Parenthesised sub-query.
    pub fn group(mut self, query: &str) -> Self {
        self.parts.push(format!("({})", query));
        self
    }

    /// Add an AND operator.
    pub fn and(mut self) -> Self {
        self.parts.push("AND".to_string());
        self
    }

    /// Add an OR operator.
    pub fn or(mut self) -> Self {
        self.parts.push("OR".to_string());
        self
    }

    /// Add a NOT operator (exclude the following term).
    pub fn exclude(mut self) -> Self {
        self.parts.push("NOT".to_string());
        self
    }

    /// Add a raw query fragment (no escaping).
    pub fn raw(mut self, query: &str) -> Self {
        self.parts.push(query.to_string());
        self
    }

    /// Build the final query string.
    pub fn build(self) -> String {
        self.parts.join(" ")
    }
}

impl std::fmt::Display for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.parts.join(" "))
    }
}

/// Exact-phrase search is only tried for titles longer than this.
const MIN_PHRASE_LEN: usize = 10;
const MAX_SIGNIFICANT_WORDS: usize = 8;
const MAX_KEY_WORDS: usize = 5;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "may", "might", "must", "can", "this", "that", "these", "those",
];

/// Strip quotes and colons, then trim.
pub fn clean_title(title: &str) -> String {
    title.replace(['"', ':'], "").trim().to_string()
}

/// Up to eight lower-cased, purely alphabetic words of three or more letters,
/// stop words removed, in title order.
pub fn significant_words(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.len() >= 3 && w.chars().all(|c| c.is_ascii_alphabetic()))
        .filter(|w| !STOP_WORDS.contains(w))
        .take(MAX_SIGNIFICANT_WORDS)
        .map(String::from)
        .collect()
}

/// Ordered search strategies for `title`, most precise first.
///
/// Without an author the list is: exact phrase (long titles only), bare title,
/// all significant words (when there are at least three), the top five
/// significant words (when there are at least two), and the cleaned title as
/// free text. With an author, every strategy is first tried conjoined with an
/// author filter and the plain list follows. An empty cleaned title yields no
/// strategies.
pub fn candidate_queries(title: &str, author: Option<&str>) -> Vec<String> {
    let cleaned = clean_title(title);
    if cleaned.is_empty() {
        return Vec::new();
    }

    let mut strategies = Vec::new();

    if cleaned.chars().count() > MIN_PHRASE_LEN {
        strategies.push(QueryBuilder::new().title_phrase(&cleaned).build());
    }

    strategies.push(QueryBuilder::new().title_words(&cleaned).build());

    let words = significant_words(&cleaned);
    if words.len() >= 3 {
        let query = words
            .iter()
            .enumerate()
            .fold(QueryBuilder::new(), |qb, (i, w)| {
                let qb = if i > 0 { qb.and() } else { qb };
                qb.title_abstract(w)
            })
            .build();
        strategies.push(query);
    }

    if words.len() >= 2 {
        strategies.push(words[..words.len().min(MAX_KEY_WORDS)].join(" AND "));
    }

    strategies.push(cleaned);

    let author = author
        .map(|a| a.replace(',', "").trim().to_string())
        .filter(|a| !a.is_empty());

    match author {
        Some(author) => {
            let mut with_author: Vec<String> = strategies
                .iter()
                .map(|q| QueryBuilder::new().group(q).and().author(&author).build())
                .collect();
            with_author.extend(strategies);
            with_author
        }
        None => strategies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_combined_query() {
        let q = QueryBuilder::new()
            .title_words("dark matter")
            .and()
            .year(2020)
            .build();
        assert_eq!(q, "dark matter[Title] AND 2020[pdat]");
    }

    #[test]
    fn test_builder_group_and_exclude() {
        let q = QueryBuilder::new()
            .group("a OR b")
            .exclude()
            .raw("review[pt]")
            .build();
        assert_eq!(q, "(a OR b) NOT review[pt]");
    }

    #[test]
    fn test_display_trait() {
        let q = QueryBuilder::new().author("Hawking").or().author("Penrose");
        assert_eq!(format!("{}", q), "\"Hawking\"[Author] OR \"Penrose\"[Author]");
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"COVID: a review\" "), "COVID a review");
    }

    #[test]
    fn test_significant_words() {
        let words = significant_words("The Risk of Long COVID in the UK: covid19 outcomes");
        assert_eq!(words, vec!["risk", "long", "covid", "outcomes"]);
    }

    #[test]
    fn test_significant_words_capped_at_eight() {
        let words = significant_words("alpha beta gamma delta epsilon zeta theta iota kappa lambda");
        assert_eq!(words.len(), 8);
        assert_eq!(words[7], "iota");
    }

    #[test]
    fn test_five_strategies_without_author() {
        let q = candidate_queries("Risk of long COVID and outcomes", None);
        assert_eq!(
            q,
            vec![
                "\"Risk of long COVID and outcomes\"[Title]",
                "Risk of long COVID and outcomes[Title]",
                "risk[Title/Abstract] AND long[Title/Abstract] AND covid[Title/Abstract] AND outcomes[Title/Abstract]",
                "risk AND long AND covid AND outcomes",
                "Risk of long COVID and outcomes",
            ]
        );
    }

    #[test]
    fn test_ten_strategies_with_author_first() {
        let q = candidate_queries("Risk of long COVID and outcomes", Some("Smith,"));
        assert_eq!(q.len(), 10);
        for (i, query) in q[..5].iter().enumerate() {
            assert!(query.ends_with(" AND \"Smith\"[Author]"), "{}", query);
            assert_eq!(query, &format!("({}) AND \"Smith\"[Author]", q[i + 5]));
        }
        assert!(!q[5].contains("[Author]"));
    }

    #[test]
    fn test_short_title_skips_phrase_and_word_strategies() {
        let q = candidate_queries("Obesity", None);
        assert_eq!(q, vec!["Obesity[Title]", "Obesity"]);
    }

    #[test]
    fn test_two_significant_words() {
        let q = candidate_queries("Asthma in children", None);
        assert_eq!(
            q,
            vec![
                "\"Asthma in children\"[Title]",
                "Asthma in children[Title]",
                "asthma AND children",
                "Asthma in children",
            ]
        );
    }

    #[test]
    fn test_empty_title_has_no_strategies() {
        assert!(candidate_queries(" \": ", None).is_empty());
        assert!(candidate_queries("", Some("Smith")).is_empty());
    }

    #[test]
    fn test_blank_author_ignored() {
        assert_eq!(candidate_queries("Obesity", Some(" , ")).len(), 2);
    }
}
