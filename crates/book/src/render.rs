//! Payload rendering.
//!
//! The payload is a plain-text description of the book standing in for a
//! rendered document. It is produced from an [upon] template with these
//! variables:
//!
//! | Variable     | Type             | Description                       |
//! |--------------|------------------|-----------------------------------|
//! | `title`      | `String`         | Configured title, or the default  |
//! | `book_id`    | `String`         | Generated book identifier         |
//! | `page_count` | `u64`            | Number of pages                   |
//! | `format`     | `Option<String>` | Configured `format` option        |
//! | `style`      | `Option<String>` | Configured `style` option         |
//! | `pages`      | list             | `number`, `kind` and `content`    |

use crate::error::{Error, ErrorKind, Result};
use crate::models::{BookConfig, BookId, Page};
use exn::ResultExt;
use std::str::FromStr;
use tracing::instrument;
use upon::{Engine, Template, Value};

pub const DEFAULT_TEMPLATE: &str = "\
{{ title }}
Book ID: {{ book_id }}
Pages: {{ page_count }}
{% if format %}Format: {{ format }}
{% endif %}{% if style %}Style: {{ style }}
{% endif %}
{% for page in pages %}{{ page.number }} [{{ page.kind }}] {{ page.content }}
{% endfor %}";

/// Renders page sequences into payload bytes.
///
/// Constructed via [`FromStr`], which compiles the template eagerly so that
/// syntax errors surface at creation time rather than at render time.
pub struct PayloadRenderer {
    engine: Engine<'static>,
    template: Template<'static>,
}
impl FromStr for PayloadRenderer {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let engine = Engine::new();
        let template = engine.compile(s.to_string()).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template })
    }
}
impl PayloadRenderer {
    pub fn new() -> Result<Self> {
        DEFAULT_TEMPLATE.parse()
    }

    #[instrument(skip_all, fields(%book_id, pages = pages.len()))]
    pub fn render(&self, book_id: &BookId, config: &BookConfig, pages: &[Page]) -> Result<Vec<u8>> {
        let rendered = self
            .template
            .render(&self.engine, Self::parameters(book_id, config, pages))
            .to_string()
            .or_raise(|| ErrorKind::Template)?;
        Ok(rendered.into_bytes())
    }

    fn parameters(book_id: &BookId, config: &BookConfig, pages: &[Page]) -> Value {
        let pages: Vec<Value> = pages
            .iter()
            .map(|page| {
                upon::value! {
                    number: page.number,
                    kind: page.kind.as_str(),
                    content: page.content.as_str(),
                }
            })
            .collect();
        upon::value! {
            title: config.title(),
            book_id: book_id.as_str(),
            page_count: pages.len() as u64,
            format: config.format(),
            style: config.style(),
            pages: Value::List(pages),
        }
    }
}
