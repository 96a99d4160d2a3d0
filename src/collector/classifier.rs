//! Table-driven classification of parsed products.
//!
//! Category comes from an ordered keyword table over title + description:
//! first matching rule wins, table order breaks ties, unmatched records fall
//! into the default bucket. The table is plain data handed to the classifier
//! at construction, so deployments can swap it without touching the pipeline.

use chrono::Utc;

use crate::collector::parser::ParsedProduct;
use crate::collector::{InformationRow, ProductRecord, Status};

/// One ordered rule: if any keyword occurs in the record text, the record
/// gets this category.
#[derive(Debug, Clone, Copy)]
pub struct CategoryRule {
    pub category: &'static str,
    pub keywords: &'static [&'static str],
}

/// Default rule table for the watched catalog. Keywords are matched against
/// lowercased text; the Japanese terms match the site's own labels.
pub const DEFAULT_RULES: &[CategoryRule] = &[
    CategoryRule {
        category: "goods",
        keywords: &[
            "plush", "figure", "mascot", "keychain", "acrylic", "pre-order", "limited",
            "グッズ", "発売", "予約", "限定", "ぬいぐるみ", "フィギュア", "マスコット",
        ],
    },
    CategoryRule {
        category: "lottery",
        keywords: &["lottery", "kuji", "一番くじ", "くじ", "ロット", "景品"],
    },
    CategoryRule {
        category: "event",
        keywords: &[
            "event", "cafe", "pop-up", "popup", "collab", "exhibition",
            "イベント", "開催", "コラボ", "カフェ", "ポップアップ", "展示",
        ],
    },
    CategoryRule {
        category: "comic",
        keywords: &["episode", "chapter", "serialization", "更新", "掲載", "連載", "エピソード"],
    },
    CategoryRule {
        category: "anime",
        keywords: &["anime", "broadcast", "streaming", "放送", "配信", "声優"],
    },
];

pub const DEFAULT_CATEGORY: &str = "other";

pub struct Classifier {
    rules: &'static [CategoryRule],
    default_category: &'static str,
}

impl Classifier {
    pub fn new() -> Self {
        Self::with_rules(DEFAULT_RULES, DEFAULT_CATEGORY)
    }

    pub fn with_rules(rules: &'static [CategoryRule], default_category: &'static str) -> Self {
        Self {
            rules,
            default_category,
        }
    }

    /// Assign status and category, turning a parsed candidate into a full
    /// record stamped with this observation's timestamp.
    ///
    /// Status: `New` without a prior row; with one, `Restock` iff both event
    /// dates are non-null and differ, otherwise the stored status carries
    /// over.
    pub fn classify(
        &self,
        parsed: ParsedProduct,
        prior: Option<&InformationRow>,
        source: &str,
    ) -> ProductRecord {
        let text = match &parsed.content {
            Some(content) => format!("{} {}", parsed.title, content).to_lowercase(),
            None => parsed.title.to_lowercase(),
        };
        let category = self.categorize(&text).to_string();

        let status = match prior {
            None => Status::New,
            Some(row) => match (&row.event_date, &parsed.event_date) {
                (Some(prev), Some(next)) if prev != next => Status::Restock,
                _ => row.status,
            },
        };

        ProductRecord {
            source: source.to_string(),
            source_id: parsed.source_id,
            title: parsed.title,
            content: parsed.content,
            url: parsed.url,
            images: parsed.images,
            price: parsed.price,
            status,
            category,
            event_date: parsed.event_date,
            observed_at: Utc::now(),
        }
    }

    fn categorize(&self, text: &str) -> &'static str {
        for rule in self.rules {
            if rule.keywords.iter().any(|keyword| text.contains(keyword)) {
                return rule.category;
            }
        }
        self.default_category
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn parsed(title: &str, event_date: Option<&str>) -> ParsedProduct {
        ParsedProduct {
            source_id: "abc123".to_string(),
            title: title.to_string(),
            content: None,
            url: "https://market.test/products/x".to_string(),
            images: Vec::new(),
            price: None,
            event_date: event_date.map(String::from),
        }
    }

    fn stored(status: Status, event_date: Option<&str>) -> InformationRow {
        InformationRow {
            id: Some(1),
            source: "market".to_string(),
            source_id: "abc123".to_string(),
            title: "old title".to_string(),
            content: None,
            url: "https://market.test/products/x".to_string(),
            images: Vec::new(),
            price: None,
            status,
            category: "goods".to_string(),
            published_at: Utc::now(),
            event_date: event_date.map(String::from),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn first_matching_rule_wins_in_table_order() {
        let classifier = Classifier::new();
        // "plush" (goods) appears before any event keyword could match.
        let record = classifier.classify(parsed("Cafe Plush Mascot", None), None, "market");
        assert_eq!(record.category, "goods");
    }

    #[test]
    fn unmatched_titles_get_the_default_category() {
        let classifier = Classifier::new();
        let record = classifier.classify(parsed("Untitled thing", None), None, "market");
        assert_eq!(record.category, "other");
    }

    #[test]
    fn japanese_keywords_match_unlowered() {
        let classifier = Classifier::new();
        let record = classifier.classify(parsed("ちいかわ ぬいぐるみ", None), None, "market");
        assert_eq!(record.category, "goods");
    }

    #[test]
    fn rule_table_is_swappable() {
        static RULES: &[CategoryRule] = &[CategoryRule {
            category: "snack",
            keywords: &["cookie"],
        }];
        let classifier = Classifier::with_rules(RULES, "misc");

        let cookie = classifier.classify(parsed("Cookie tin", None), None, "market");
        assert_eq!(cookie.category, "snack");
        let other = classifier.classify(parsed("Plush", None), None, "market");
        assert_eq!(other.category, "misc");
    }

    #[test]
    fn no_prior_row_means_new() {
        let record = Classifier::new().classify(parsed("Plush", Some("2024-06-01")), None, "market");
        assert_eq!(record.status, Status::New);
    }

    #[test]
    fn differing_dates_flip_status_to_restock() {
        let prior = stored(Status::New, Some("2024-05-01"));
        let record = Classifier::new().classify(
            parsed("Plush", Some("2024-05-10")),
            Some(&prior),
            "market",
        );
        assert_eq!(record.status, Status::Restock);
    }

    #[test]
    fn equal_or_missing_dates_inherit_the_stored_status() {
        let prior = stored(Status::Restock, Some("2024-05-01"));

        let same = Classifier::new().classify(
            parsed("Plush", Some("2024-05-01")),
            Some(&prior),
            "market",
        );
        assert_eq!(same.status, Status::Restock);

        let missing = Classifier::new().classify(parsed("Plush", None), Some(&prior), "market");
        assert_eq!(missing.status, Status::Restock);

        // Null stored date: the flip rule needs both sides non-null.
        let prior_null = stored(Status::New, None);
        let appeared = Classifier::new().classify(
            parsed("Plush", Some("2024-06-01")),
            Some(&prior_null),
            "market",
        );
        assert_eq!(appeared.status, Status::New);
    }
}
