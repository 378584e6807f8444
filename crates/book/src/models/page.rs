use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Cover,
    Content,
    Back,
}
impl PageKind {
    /// Kind of page `number` (1-based) in a book of `total` pages.
    ///
    /// The first page is the cover, the last the back, everything in between
    /// is content. A single-page book is just a cover.
    pub fn for_position(number: u64, total: u64) -> Self {
        if number == 1 {
            PageKind::Cover
        } else if number == total {
            PageKind::Back
        } else {
            PageKind::Content
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::Cover => "cover",
            PageKind::Content => "content",
            PageKind::Back => "back",
        }
    }
}
impl Display for PageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u64,
    pub kind: PageKind,
    pub content: String,
}
