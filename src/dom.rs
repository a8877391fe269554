//! Uniform DOM query surface over static parses and live rendered pages.
//!
//! Extractors are written once against [`DomAccess`]; [`StaticDom`] backs the
//! fast tier and [`crate::render::RenderedDom`] backs the browser tier.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use thiserror::Error;

/// MIME type of embedded structured data scripts.
pub const JSON_LD_TYPE: &str = "application/ld+json";

/// Errors raised by a DOM backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    /// The CSS selector could not be parsed.
    #[error("invalid selector `{selector}`: {message}")]
    Selector {
        /// Selector as given.
        selector: String,
        /// Parser diagnostic.
        message: String,
    },
    /// The live page failed to evaluate a query.
    #[error("page evaluation failed: {0}")]
    Evaluation(String),
}

/// Snapshot of one matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementHandle {
    tag: String,
    text: Option<String>,
    inner_html: String,
    attributes: BTreeMap<String, String>,
}

impl ElementHandle {
    /// Builds a handle from already collected parts. Text is whitespace-collapsed
    /// and treated as absent when empty.
    pub fn new(
        tag: impl Into<String>,
        text: Option<&str>,
        inner_html: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        let text = text.map(collapse_whitespace).filter(|t| !t.is_empty());
        Self {
            tag: tag.into().to_ascii_lowercase(),
            text,
            inner_html: inner_html.into(),
            attributes,
        }
    }

    /// Lowercase tag name.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Collapsed visible text, absent when the element has none.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Attribute value by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Raw inner markup.
    pub fn inner_html(&self) -> &str {
        &self.inner_html
    }
}

/// Query capability every extraction backend provides.
#[async_trait(?Send)]
pub trait DomAccess {
    /// Returns every element matching `selector` in document order.
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>, DomError>;

    /// Document title, empty when absent.
    async fn title(&self) -> Result<String, DomError>;

    /// Inner markup of `body`, empty when absent.
    async fn body_markup(&self) -> Result<String, DomError>;

    /// Raw contents of every `script[type=...]` element.
    async fn scripts_by_type(&self, script_type: &str) -> Result<Vec<String>, DomError> {
        let selector = format!("script[type=\"{script_type}\"]");
        Ok(self
            .query_all(&selector)
            .await?
            .into_iter()
            .map(|script| script.inner_html)
            .collect())
    }
}

/// [`DomAccess`] over a parsed static document.
pub struct StaticDom {
    document: Html,
}

impl StaticDom {
    /// Parses a full HTML document.
    pub fn parse(markup: &str) -> Self {
        Self {
            document: Html::parse_document(markup),
        }
    }

    fn selector(selector: &str) -> Result<Selector, DomError> {
        Selector::parse(selector).map_err(|err| DomError::Selector {
            selector: selector.to_string(),
            message: err.to_string(),
        })
    }

    fn first_inner_html(&self, selector: &Selector) -> String {
        self.document
            .select(selector)
            .next()
            .map(|el| el.inner_html())
            .unwrap_or_default()
    }
}

#[async_trait(?Send)]
impl DomAccess for StaticDom {
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>, DomError> {
        let parsed = Self::selector(selector)?;
        Ok(self
            .document
            .select(&parsed)
            .map(|el| {
                let raw: String = el.text().collect();
                let attributes = el
                    .value()
                    .attrs()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect();
                ElementHandle::new(
                    el.value().name(),
                    Some(raw.as_str()),
                    el.inner_html(),
                    attributes,
                )
            })
            .collect())
    }

    async fn title(&self) -> Result<String, DomError> {
        let selector = Self::selector("title")?;
        Ok(self
            .document
            .select(&selector)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default())
    }

    async fn body_markup(&self) -> Result<String, DomError> {
        let selector = Self::selector("body")?;
        Ok(self.first_inner_html(&selector))
    }
}

/// Collapses whitespace runs into single spaces and trims the ends.
pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html lang="en">
          <head>
            <title>  Acme
              Tools </title>
            <script type="application/ld+json">{"@type": "Organization"}</script>
          </head>
          <body>
            <h1 class="hero">Anvils   for
              everyone</h1>
            <a href="/about">About</a>
            <p></p>
          </body>
        </html>
    "#;

    #[tokio::test(flavor = "current_thread")]
    async fn static_dom_answers_queries() {
        let dom = StaticDom::parse(PAGE);

        assert_eq!(dom.title().await.unwrap(), "Acme Tools");

        let h1 = dom.query_all("h1").await.unwrap();
        assert_eq!(h1.len(), 1);
        assert_eq!(h1[0].tag(), "h1");
        assert_eq!(h1[0].text(), Some("Anvils for everyone"));
        assert_eq!(h1[0].attribute("class"), Some("hero"));

        let empty = dom.query_all("p").await.unwrap();
        assert_eq!(empty[0].text(), None);

        let html = dom.query_all("html").await.unwrap();
        assert_eq!(html[0].attribute("lang"), Some("en"));

        assert!(dom.body_markup().await.unwrap().contains("href=\"/about\""));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn scripts_keep_raw_contents() {
        let dom = StaticDom::parse(PAGE);
        let scripts = dom.scripts_by_type(JSON_LD_TYPE).await.unwrap();
        assert_eq!(scripts, vec![r#"{"@type": "Organization"}"#.to_string()]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalid_selector_is_reported() {
        let dom = StaticDom::parse(PAGE);
        let err = dom.query_all("a[").await.expect_err("invalid selector");
        assert!(matches!(err, DomError::Selector { .. }));
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(collapse_whitespace("  a \n\t b  "), "a b");
        assert_eq!(collapse_whitespace("   "), "");
    }
}
