//! Utility functions shared by the pipeline stages.
//!
//! - **URL validation**: SSRF-safe validation for URLs the service fetches
//! - **Text processing**: entity decoding, CDATA unwrapping, char-safe truncation
//! - **Retry policy**: attempt budget with backoff and server-supplied delays
//!
//! # Examples
//!
//! ```
//! use feedpush::util::{decode_entities, truncate_with_ellipsis, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml", false).unwrap();
//! assert_eq!(decode_entities("Tom &amp; Jerry"), "Tom & Jerry");
//! assert_eq!(truncate_with_ellipsis("Long article title", 4), "Long...");
//! ```

mod retry;
mod text;
mod url_validator;

pub use retry::{RetryHint, RetryPolicy, Retryable};
pub use text::{
    collapse_whitespace, decode_entities, html_to_text, strip_cdata,
    strip_control_chars, truncate_chars, truncate_with_ellipsis,
};
pub use url_validator::{is_well_formed_url, validate_url, UrlValidationError, MAX_URL_LENGTH};
