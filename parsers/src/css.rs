//! Stylesheet resource scanning

use crate::resolve::resolve_href;
use cssparser::{ParseError, Parser, ParserInput, Token};
use pageload_core::request::EmbeddedResource;
use pageload_core::traits::CssParser;
use std::collections::HashSet;
use url::Url;

/// cssparser-backed implementation of [`CssParser`]
///
/// Tokenizes the stylesheet and descends into nested blocks: `@import`
/// targets come back as CSS-kind resources (they are stylesheets
/// themselves), `url(...)` references (unquoted or function form) as
/// regular ones. Duplicate URIs collapse to their first occurrence.
#[derive(Debug, Default, Clone, Copy)]
pub struct CssTokenParser;

impl CssTokenParser {
    /// Create the parser
    pub fn new() -> Self {
        Self
    }
}

impl CssParser for CssTokenParser {
    fn extract_resources(&self, document_uri: &Url, text: &str) -> Vec<EmbeddedResource> {
        let mut input = ParserInput::new(text);
        let mut parser = Parser::new(&mut input);

        let mut collector = Collector {
            base: document_uri.clone(),
            seen: HashSet::new(),
            resources: Vec::new(),
        };
        collector.scan(&mut parser);

        tracing::debug!(
            uri = %document_uri,
            count = collector.resources.len(),
            "Scanned stylesheet for referenced resources"
        );
        collector.resources
    }
}

struct Collector {
    base: Url,
    seen: HashSet<Url>,
    resources: Vec<EmbeddedResource>,
}

impl Collector {
    fn scan<'i>(&mut self, parser: &mut Parser<'i, '_>) {
        loop {
            let token = match parser.next() {
                Ok(token) => token.clone(),
                Err(_) => return,
            };

            match token {
                Token::AtKeyword(ref keyword) if keyword.eq_ignore_ascii_case("import") => {
                    self.scan_import_target(parser);
                }
                Token::UnquotedUrl(ref target) => {
                    self.push(target, false);
                }
                Token::Function(ref name) if name.eq_ignore_ascii_case("url") => {
                    if let Some(target) = first_quoted_string(parser) {
                        self.push(&target, false);
                    }
                }
                Token::Function(_)
                | Token::ParenthesisBlock
                | Token::SquareBracketBlock
                | Token::CurlyBracketBlock => {
                    let _ = parser.parse_nested_block(|nested| -> Result<(), ParseError<'i, ()>> {
                        self.scan(nested);
                        Ok(())
                    });
                }
                _ => {}
            }
        }
    }

    /// The token after `@import`: a quoted string, a bare url, or `url(...)`
    fn scan_import_target<'i>(&mut self, parser: &mut Parser<'i, '_>) {
        let token = match parser.next() {
            Ok(token) => token.clone(),
            Err(_) => return,
        };

        match token {
            Token::QuotedString(ref target) | Token::UnquotedUrl(ref target) => {
                self.push(target, true);
            }
            Token::Function(ref name) if name.eq_ignore_ascii_case("url") => {
                if let Some(target) = first_quoted_string(parser) {
                    self.push(&target, true);
                }
            }
            _ => {}
        }
    }

    fn push(&mut self, target: &str, import: bool) {
        if let Some(uri) = resolve_href(&self.base, target) {
            if self.seen.insert(uri.clone()) {
                self.resources.push(if import {
                    EmbeddedResource::css(uri)
                } else {
                    EmbeddedResource::regular(uri)
                });
            }
        }
    }
}

fn first_quoted_string<'i>(parser: &mut Parser<'i, '_>) -> Option<String> {
    parser
        .parse_nested_block(|nested| -> Result<String, ParseError<'i, ()>> {
            loop {
                match nested.next() {
                    Ok(Token::QuotedString(value)) => return Ok(value.as_ref().to_string()),
                    Ok(_) => continue,
                    Err(error) => return Err(error.into()),
                }
            }
        })
        .ok()
}
