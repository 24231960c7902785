//! HTML embedded-resource scanning

use crate::resolve::resolve_href;
use html5ever::tendril::TendrilSink;
use html5ever::tree_builder::TreeBuilderOpts;
use html5ever::{parse_document, Attribute, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use pageload_core::request::EmbeddedResource;
use pageload_core::traits::HtmlParser;
use std::collections::HashSet;
use url::Url;

/// html5ever-backed implementation of [`HtmlParser`]
///
/// Parses the body into a DOM (scripting disabled) and walks it, collecting
/// what a browser would fetch while rendering: stylesheets and icons from
/// `<link>`, `<img>`/`<script>`/`<frame>`/`<iframe>`/`<embed>`/`<source>`
/// sources, image inputs, `<object>` data, video posters, and legacy body
/// backgrounds. A `<base href>` (first one wins) rebases subsequent
/// resolution; `<template>` content is inert and skipped. Duplicate URIs
/// collapse to their first occurrence.
#[derive(Debug, Default, Clone, Copy)]
pub struct Html5Parser;

impl Html5Parser {
    /// Create the parser
    pub fn new() -> Self {
        Self
    }
}

impl HtmlParser for Html5Parser {
    fn embedded_resources(
        &self,
        document_uri: &Url,
        body: &str,
        _user_agent: &str,
    ) -> Vec<EmbeddedResource> {
        let opts = ParseOpts {
            tree_builder: TreeBuilderOpts {
                scripting_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let dom = parse_document(RcDom::default(), opts).one(body);

        let mut collector = Collector {
            base: document_uri.clone(),
            base_set: false,
            seen: HashSet::new(),
            resources: Vec::new(),
        };
        collector.walk(&dom.document);

        tracing::debug!(
            uri = %document_uri,
            count = collector.resources.len(),
            "Scanned HTML document for embedded resources"
        );
        collector.resources
    }
}

struct Collector {
    base: Url,
    base_set: bool,
    seen: HashSet<Url>,
    resources: Vec<EmbeddedResource>,
}

impl Collector {
    fn walk(&mut self, handle: &Handle) {
        if let NodeData::Element { name, attrs, .. } = &handle.data {
            let attrs = attrs.borrow();
            let tag = name.local.as_ref();

            match tag {
                "base" => {
                    if !self.base_set {
                        if let Some(href) = attr(&attrs, "href") {
                            if let Some(rebased) = resolve_href(&self.base, href) {
                                self.base = rebased;
                                self.base_set = true;
                            }
                        }
                    }
                }
                "link" => {
                    if let (Some(rel), Some(href)) = (attr(&attrs, "rel"), attr(&attrs, "href")) {
                        if rel_contains(rel, "stylesheet") {
                            self.push_css(href);
                        } else if rel_contains(rel, "icon") {
                            self.push_regular(href);
                        }
                    }
                }
                "img" | "script" | "frame" | "iframe" | "embed" | "source" => {
                    if let Some(src) = attr(&attrs, "src") {
                        self.push_regular(src);
                    }
                }
                "input" => {
                    let is_image_input = attr(&attrs, "type")
                        .map(|t| t.eq_ignore_ascii_case("image"))
                        .unwrap_or(false);
                    if is_image_input {
                        if let Some(src) = attr(&attrs, "src") {
                            self.push_regular(src);
                        }
                    }
                }
                "object" => {
                    if let Some(data) = attr(&attrs, "data") {
                        self.push_regular(data);
                    }
                }
                "video" => {
                    if let Some(poster) = attr(&attrs, "poster") {
                        self.push_regular(poster);
                    }
                    if let Some(src) = attr(&attrs, "src") {
                        self.push_regular(src);
                    }
                }
                "body" => {
                    if let Some(background) = attr(&attrs, "background") {
                        self.push_regular(background);
                    }
                }
                // template content is inert, a browser fetches nothing from it
                "template" => return,
                _ => {}
            }
        }

        for child in handle.children.borrow().iter() {
            self.walk(child);
        }
    }

    fn push_regular(&mut self, href: &str) {
        if let Some(uri) = resolve_href(&self.base, href) {
            if self.seen.insert(uri.clone()) {
                self.resources.push(EmbeddedResource::regular(uri));
            }
        }
    }

    fn push_css(&mut self, href: &str) {
        if let Some(uri) = resolve_href(&self.base, href) {
            if self.seen.insert(uri.clone()) {
                self.resources.push(EmbeddedResource::css(uri));
            }
        }
    }
}

fn attr<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|a| a.name.local.as_ref() == name)
        .map(|a| a.value.as_ref())
}

fn rel_contains(rel: &str, token: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|t| t.eq_ignore_ascii_case(token))
}
