// src/checker/mod.rs
// =============================================================================
// This module contains the page and link checking logic.
//
// Submodules:
// - html: Extracts title, doctype, login form, tag counts and links from HTML
// - http: Fetches the page, probes links and classifies them
//
// Nothing here knows about jobs or cancellation; the crawl pipeline drives
// these functions and decides what to do with the results.
// =============================================================================

mod html;
mod http;

pub use html::{detect_html_version, extract_page, resolve_link, CandidateLink, PageInfo};
pub use http::{classify_link, same_origin, FetchedPage, ProbeOutcome, WebClient};
