//! Bridge documents: minimal generated HTML that references staged
//! content by key, giving the rendering engine an addressable page to
//! navigate to.

use url::Url;

/// Selector of the embedded image placeholder the pipeline waits for and
/// screenshots.
pub const IMAGE_SELECTOR: &str = "#svg";

/// Minimal document whose body references the data endpoint for `key`.
/// The src is relative so the engine fetches it from the same host it
/// fetched the bridge document from.
pub fn bridge_document(key: &str) -> String {
    format!(r#"<html><body><img id="svg" src="/data/{key}" /></body></html>"#)
}

/// Externally-reachable URL of the bridge document for `key`.
pub fn bridge_url(base: &Url, key: &str) -> Result<Url, url::ParseError> {
    base.join(&format!("bridge/{key}"))
}
