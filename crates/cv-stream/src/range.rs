//! HTTP `Range` header → [`RangeRequest`]

use cv_core::{CvError, CvResult, RangeRequest};

/// Parse a single-range `Range` header value.
///
/// Accepts `bytes=a-b`, `bytes=a-` and the suffix form `bytes=-n` (the last
/// `n` bytes, resolved against `size`). Bounds are checked later by
/// [`RangeRequest::resolve`].
pub fn parse_range_header(value: &str, size: u64) -> CvResult<RangeRequest> {
    let malformed = || CvError::MalformedRange(value.to_string());

    let spec = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(malformed)?
        .trim();

    if spec.contains(',') {
        return Err(CvError::UnsupportedMultiRange);
    }

    let (first, last) = spec.split_once('-').ok_or_else(malformed)?;
    let (first, last) = (first.trim(), last.trim());
    let parse = |s: &str| s.parse::<u64>().map_err(|_| malformed());

    match (first.is_empty(), last.is_empty()) {
        (false, true) => Ok(RangeRequest::new(parse(first)?, None)),
        (false, false) => Ok(RangeRequest::new(parse(first)?, Some(parse(last)?))),
        (true, false) => {
            let suffix = parse(last)?;
            if suffix == 0 {
                return Err(CvError::RangeOutOfBounds {
                    start: size,
                    len: 0,
                    size,
                });
            }
            Ok(RangeRequest::new(size.saturating_sub(suffix), None))
        }
        (true, true) => Err(malformed()),
    }
}
