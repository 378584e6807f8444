use crate::models::{AggregationResult, BookConfig, Page, PageKind};
use tracing::instrument;

/// Lay out `aggregation.estimated_pages` pages, numbered from 1.
///
/// Page content is a placeholder naming the page; the cover carries the
/// configured title.
#[instrument(skip_all, fields(pages = aggregation.estimated_pages))]
pub fn synthesize(aggregation: &AggregationResult, config: &BookConfig) -> Vec<Page> {
    let total = aggregation.estimated_pages;
    (1..=total)
        .map(|number| {
            let kind = PageKind::for_position(number, total);
            let content = match kind {
                PageKind::Cover => config.title().to_string(),
                PageKind::Content => format!("Page {number}"),
                PageKind::Back => format!("Page {number} (back cover)"),
            };
            Page { number, kind, content }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pages(estimated_pages: u64) -> Vec<Page> {
        let aggregation = AggregationResult {
            total_messages: 0,
            conversation_files: 0,
            eligible_files: 0,
            estimated_pages,
        };
        synthesize(&aggregation, &BookConfig::new())
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    #[case(10)]
    #[case(57)]
    fn test_kinds_for_multiple_pages(#[case] n: u64) {
        let pages = pages(n);
        assert_eq!(pages.len() as u64, n);
        assert_eq!(pages[0].kind, PageKind::Cover);
        assert_eq!(pages[pages.len() - 1].kind, PageKind::Back);
        assert!(pages[1..pages.len() - 1].iter().all(|p| p.kind == PageKind::Content));
        assert!(pages.iter().zip(1..).all(|(page, number)| page.number == number));
    }

    #[test]
    fn test_single_page_is_cover() {
        let pages = pages(1);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].kind, PageKind::Cover);
    }

    #[test]
    fn test_cover_carries_title() {
        let aggregation = AggregationResult::new(120, 3, 3);
        let pages = synthesize(&aggregation, &BookConfig::new().with("title", "Nos souvenirs"));
        assert_eq!(pages.len(), 10);
        assert_eq!(pages[0].content, "Nos souvenirs");
        assert_eq!(pages[4].content, "Page 5");
    }
}
