//! Small helpers over `scraper` shared by the HTML adapters.

use crate::normalize::clean_text;
use reqwest::Url;
use scraper::{ElementRef, Selector};

/// Compiles a selector literal. Only called from `Lazy` statics.
pub(crate) fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("valid css selector")
}

pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty())
}

pub(crate) fn first_attr(element: ElementRef<'_>, selector: &Selector, name: &str) -> Option<String> {
    element
        .select(selector)
        .find_map(|e| e.value().attr(name))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolves `href` against `base`; returns `href` unchanged when either is unusable.
pub(crate) fn absolute_url(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}
