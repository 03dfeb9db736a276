//! URL building for ids that end up in a path. Every id is pushed as one escaped
//! segment, so `/`, `?`, `#` and spaces stay inside it.

use crate::error::{BrokerError, Result};
use url::Url;

/// Base for resolving path-only prefixes such as `/api/screenshot`
const PATH_ONLY_BASE: &str = "http://localhost/";

/// Parse a collaborator base URL that ids will be appended to
pub fn parse_base(base: &str) -> Result<Url> {
    let url = Url::parse(base)?;
    if url.cannot_be_a_base() {
        return Err(BrokerError::Validation(format!(
            "{base} cannot carry path segments"
        )));
    }
    Ok(url)
}

/// `base` with `segments` appended, each percent-encoded as a single segment
pub fn with_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Same as [`with_segments`] for a prefix that may be a bare path.
/// A bare path prefix yields a bare path.
pub fn append_segments(prefix: &str, segments: &[&str]) -> Result<String> {
    match Url::parse(prefix) {
        Ok(_) => Ok(with_segments(&parse_base(prefix)?, segments).into()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(PATH_ONLY_BASE)?.join(prefix)?;
            Ok(with_segments(&base, segments).path().to_string())
        }
        Err(e) => Err(e.into()),
    }
}
