//! Media URL resolution
//!
//! Course authors paste Google Drive share links; transports need direct
//! download URLs. Anything that isn't a recognizable Drive link passes
//! through unchanged.

use regex::Regex;
use std::sync::OnceLock;

fn drive_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:id=|/d/|download\?id=)([-\w]+)").expect("drive id regex compiles")
    })
}

/// Rewrite a Google Drive share URL to a direct-download URL
pub fn direct_download_link(url: &str) -> String {
    match drive_id_regex().captures(url) {
        Some(captures) => format!(
            "https://drive.usercontent.google.com/download?id={}",
            &captures[1]
        ),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_share_links() {
        assert_eq!(
            direct_download_link("https://drive.google.com/file/d/1AbC-xyz_9/view"),
            "https://drive.usercontent.google.com/download?id=1AbC-xyz_9"
        );
        assert_eq!(
            direct_download_link("https://drive.google.com/open?id=42abc"),
            "https://drive.usercontent.google.com/download?id=42abc"
        );
    }

    #[test]
    fn passes_other_urls_through() {
        let url = "https://example.com/audio.mp3";
        assert_eq!(direct_download_link(url), url);
    }
}
