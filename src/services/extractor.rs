//! Guest code extraction from decoded QR payloads
//!
//! Invitations encode either the bare guest code or a link carrying it as a
//! query parameter. Extraction never fails: anything that is not a usable
//! link falls back to a substring heuristic, and the result may be empty.

use url::Url;

/// Query parameters that may carry the guest code, highest priority first
const CODE_PARAMS: [&str; 3] = ["codigo", "code", "c"];

/// Marker searched for in payloads that are not absolute URLs
const CODE_MARKER: &str = "codigo=";

/// Normalize a raw decoded payload into a canonical guest code
pub fn extract_code(raw: &str) -> String {
    if let Some(code) = code_from_url(raw) {
        return code;
    }

    let base = match raw.find(CODE_MARKER) {
        Some(idx) => &raw[idx + CODE_MARKER.len()..],
        None => raw,
    };
    base.split('&').next().unwrap_or(base).trim().to_string()
}

/// First non-empty code parameter of an absolute URL
fn code_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;

    CODE_PARAMS.iter().find_map(|param| {
        url.query_pairs()
            .find(|(key, _)| key == param)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
            .map(|value| value.trim().to_string())
    })
}
