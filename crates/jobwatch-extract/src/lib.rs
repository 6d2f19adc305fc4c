//! Keyword-filtered posting extraction from tabular listing pages.
//!
//! Extraction runs against the [`TableSource`] abstraction: tables yield rows, rows yield cells
//! and links. [`HtmlTableSource`] is the `scraper`-backed implementation; anything that can
//! present a page as tables can be swapped in.

use std::collections::HashSet;

use jobwatch_core::Posting;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;

pub const CRATE_NAME: &str = "jobwatch-extract";

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "sde-1",
    "2026 batch",
    "software engineer i",
    "graduate engineer trainee",
    "intern",
];

pub const DISPLAY_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Header,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCell {
    pub kind: CellKind,
    /// Whitespace-normalized text content; may be empty.
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingRow {
    pub cells: Vec<ListingCell>,
    /// Link targets inside the row, in document order.
    pub links: Vec<String>,
}

impl ListingRow {
    pub fn has_data_cells(&self) -> bool {
        self.cells.iter().any(|c| c.kind == CellKind::Data)
    }

    /// Lowercased cell text joined by single spaces, used for keyword matching.
    pub fn flattened_text(&self) -> String {
        normalize_whitespace(
            &self
                .non_empty_cells()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
        )
    }

    pub fn display_text(&self) -> String {
        self.non_empty_cells()
            .collect::<Vec<_>>()
            .join(DISPLAY_SEPARATOR)
    }

    pub fn first_link(&self) -> Option<&str> {
        self.links.first().map(String::as_str)
    }

    fn non_empty_cells(&self) -> impl Iterator<Item = &str> {
        self.cells
            .iter()
            .map(|c| c.text.as_str())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingTable {
    pub rows: Vec<ListingRow>,
}

/// A page viewed as a sequence of tables.
pub trait TableSource {
    fn tables(&self) -> Vec<ListingTable>;
}

impl TableSource for Vec<ListingTable> {
    fn tables(&self) -> Vec<ListingTable> {
        self.clone()
    }
}

/// HTML page parsed with `scraper`. Broken markup is repaired by the parser, never rejected.
pub struct HtmlTableSource {
    document: Html,
}

impl HtmlTableSource {
    pub fn parse(raw_markup: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw_markup);
        Self {
            document: Html::parse_document(&text),
        }
    }

    fn read_row(row: ElementRef<'_>, link_sel: &Selector) -> ListingRow {
        let cells = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter_map(|cell| {
                let kind = match cell.value().name() {
                    "td" => CellKind::Data,
                    "th" => CellKind::Header,
                    _ => return None,
                };
                Some(ListingCell {
                    kind,
                    text: element_text(cell),
                })
            })
            .collect();

        let links = row
            .select(link_sel)
            .filter_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(str::to_string)
            .collect();

        ListingRow { cells, links }
    }
}

impl TableSource for HtmlTableSource {
    fn tables(&self) -> Vec<ListingTable> {
        let (Ok(table_sel), Ok(row_sel), Ok(link_sel)) = (
            Selector::parse("table"),
            Selector::parse("tr"),
            Selector::parse("a[href]"),
        ) else {
            return Vec::new();
        };

        self.document
            .select(&table_sel)
            .map(|table| ListingTable {
                rows: table
                    .select(&row_sel)
                    .map(|row| Self::read_row(row, &link_sel))
                    .collect(),
            })
            .collect()
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive substring match against interest terms.
///
/// Deliberately not word-bounded: `intern` also hits `internship` and `internal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| normalize_whitespace(&k.as_ref().to_lowercase()))
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// `flattened` must already be lowercased.
    pub fn matches(&self, flattened: &str) -> bool {
        self.keywords.iter().any(|k| flattened.contains(k.as_str()))
    }
}

impl Default for KeywordFilter {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub tables: usize,
    pub data_rows: usize,
    pub matched_rows: usize,
    pub rows_without_link: usize,
    pub duplicate_rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub postings: Vec<Posting>,
    pub stats: ExtractStats,
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    filter: KeywordFilter,
}

impl Extractor {
    pub fn new(filter: KeywordFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &KeywordFilter {
        &self.filter
    }

    pub fn extract(&self, raw_markup: &[u8]) -> Extraction {
        self.extract_from(&HtmlTableSource::parse(raw_markup))
    }

    pub fn extract_from(&self, source: &impl TableSource) -> Extraction {
        let tables = source.tables();
        let mut stats = ExtractStats {
            tables: tables.len(),
            ..Default::default()
        };
        let mut postings = Vec::new();
        let mut ids = HashSet::new();

        for row in tables.iter().flat_map(|t| t.rows.iter()) {
            if !row.has_data_cells() {
                continue;
            }
            stats.data_rows += 1;

            if !self.filter.matches(&row.flattened_text()) {
                continue;
            }
            stats.matched_rows += 1;

            let Some(link) = row.first_link() else {
                stats.rows_without_link += 1;
                continue;
            };

            if !ids.insert(link.to_string()) {
                stats.duplicate_rows += 1;
                continue;
            }
            postings.push(Posting::from_link(link, row.display_text()));
        }

        debug!(
            tables = stats.tables,
            data_rows = stats.data_rows,
            matched = stats.matched_rows,
            postings = postings.len(),
            "extraction finished"
        );
        Extraction { postings, stats }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body><article class="markdown-body">
        <table>
          <thead><tr><th>Company</th><th>Role</th></tr></thead>
          <tbody>
            <tr><td>Acme</td><td><a href="https://x/1">Apply</a> SDE-1 New Grad</td></tr>
          </tbody>
        </table>
        </article></body></html>
    "#;

    fn row(cells: &[&str], links: &[&str]) -> ListingRow {
        ListingRow {
            cells: cells
                .iter()
                .map(|t| ListingCell {
                    kind: CellKind::Data,
                    text: t.to_string(),
                })
                .collect(),
            links: links.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn header_row_skipped_and_matching_row_extracted() {
        let extraction = Extractor::default().extract(LISTING.as_bytes());
        assert_eq!(extraction.stats.tables, 1);
        assert_eq!(extraction.stats.data_rows, 1);
        assert_eq!(
            extraction.postings,
            vec![Posting {
                id: "https://x/1".into(),
                display_text: "Acme | Apply SDE-1 New Grad".into(),
                url: "https://x/1".into(),
            }]
        );
    }

    #[test]
    fn keyword_filter_includes_and_excludes() {
        let filter = KeywordFilter::new(["SDE-1"]);
        let source = vec![ListingTable {
            rows: vec![
                row(&["Acme Corp", "SDE-1", "Remote"], &["https://x/1"]),
                row(&["Acme Corp", "Senior Staff Engineer"], &["https://x/2"]),
            ],
        }];

        let extraction = Extractor::new(filter).extract_from(&source);
        assert_eq!(extraction.postings.len(), 1);
        assert_eq!(extraction.postings[0].display_text, "Acme Corp | SDE-1 | Remote");
    }

    #[test]
    fn keyword_match_is_substring_not_word() {
        let filter = KeywordFilter::new(["intern"]);
        assert!(filter.matches("acme internal tools engineer"));
        assert!(filter.matches("summer internship"));
        assert!(!filter.matches("staff engineer"));
    }

    #[test]
    fn multi_word_keywords_match_across_irregular_whitespace() {
        let html = r#"<table><tr><td>Globex</td><td>Software
            Engineer   I</td><td><a href="/jobs/9">Apply</a></td></tr></table>"#;
        let extraction = Extractor::default().extract(html.as_bytes());
        assert_eq!(extraction.postings.len(), 1);
        assert_eq!(extraction.postings[0].display_text, "Globex | Software Engineer I | Apply");
    }

    #[test]
    fn matching_row_without_link_is_dropped() {
        let html = "<table><tr><td>Acme</td><td>SDE-1 New Grad</td></tr></table>";
        let extraction = Extractor::default().extract(html.as_bytes());
        assert!(extraction.postings.is_empty());
        assert_eq!(extraction.stats.matched_rows, 1);
        assert_eq!(extraction.stats.rows_without_link, 1);
    }

    #[test]
    fn empty_href_is_not_a_link() {
        let html = r#"<table><tr><td><a href="  ">x</a> intern</td><td><a href="https://x/3">Apply</a></td></tr></table>"#;
        let extraction = Extractor::default().extract(html.as_bytes());
        assert_eq!(extraction.postings.len(), 1);
        assert_eq!(extraction.postings[0].url, "https://x/3");
    }

    #[test]
    fn duplicate_rows_collapse_to_first() {
        let html = r#"<table>
            <tr><td>Acme</td><td><a href="https://x/1">Apply</a> intern</td></tr>
            <tr><td>Acme (again)</td><td><a href="https://x/1">Apply</a> intern</td></tr>
        </table>"#;
        let extraction = Extractor::default().extract(html.as_bytes());
        assert_eq!(extraction.postings.len(), 1);
        assert_eq!(extraction.postings[0].display_text, "Acme | Apply intern");
        assert_eq!(extraction.stats.duplicate_rows, 1);
    }

    #[test]
    fn rows_across_multiple_tables_are_scanned() {
        let html = r#"
            <table><tr><td><a href="https://a/1">Apply</a> SDE-1</td></tr></table>
            <p>between</p>
            <table><tr><td><a href="https://b/1">Apply</a> 2026 Batch</td></tr></table>"#;
        let extraction = Extractor::default().extract(html.as_bytes());
        assert_eq!(extraction.stats.tables, 2);
        let urls: Vec<_> = extraction.postings.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a/1", "https://b/1"]);
    }

    #[test]
    fn non_tabular_or_garbage_input_yields_nothing() {
        let extractor = Extractor::default();

        let list_page = r#"<ul><li><a href="https://x/1">SDE-1 intern</a></li></ul>"#;
        let extraction = extractor.extract(list_page.as_bytes());
        assert!(extraction.postings.is_empty());
        assert_eq!(extraction.stats.tables, 0);

        assert!(extractor.extract(&[0xff, 0xfe, 0x00, 0x3c]).postings.is_empty());
        assert!(extractor.extract(b"").postings.is_empty());
    }

    #[test]
    fn keyword_filter_normalizes_terms() {
        let filter = KeywordFilter::new(["  Software   Engineer I ", ""]);
        assert_eq!(filter.keywords(), &["software engineer i".to_string()]);
    }
}
