//! Pure HTML-to-report extraction, consumed by the subscriber worker's fan-out.

pub mod html;

pub use html::{
    extract_forms, extract_heading_counts, extract_html_version, extract_links, extract_title,
    merge_inaccessible,
};
