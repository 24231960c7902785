//! Embedded-resource parsers for pageload
//!
//! Production implementations of the parser traits defined in
//! `pageload-core`:
//!
//! - [`Html5Parser`] walks an html5ever DOM and collects the sub-resources
//!   a browser would fetch while rendering the page.
//! - [`CssTokenParser`] scans stylesheet tokens for `@import` targets and
//!   `url(...)` references.
//!
//! Both are pure: no network access, no shared state. Relative references
//! resolve against the document URI (HTML honors `<base href>`), and only
//! `http`/`https` targets are kept.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod css;
mod html;
mod resolve;

pub use css::CssTokenParser;
pub use html::Html5Parser;
