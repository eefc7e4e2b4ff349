/// Mime type helpers for naming stored assets and sniffing local files

pub const OCTET_STREAM: &str = "application/octet-stream";

/// File extension for a mime type, `bin` when unknown
///
/// Prefers the extension named like the subtype (`image/jpeg` -> `jpeg`).
pub fn extension_for(mime_type: &str) -> &'static str {
    let essence = essence(mime_type);
    let Some(extensions) = mime_guess::get_mime_extensions_str(&essence) else {
        return "bin";
    };
    let subtype = essence.rsplit('/').next().unwrap_or_default();
    extensions
        .iter()
        .find(|ext| ext.eq_ignore_ascii_case(subtype))
        .or_else(|| extensions.first())
        .copied()
        .unwrap_or("bin")
}

/// Mime type guessed from a path or URL's extension
pub fn from_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

/// Strip parameters: `text/plain; charset=utf-8` -> `text/plain`
pub fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_follow_the_subtype() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("Image/JPEG; quality=80"), "jpeg");
        assert_eq!(extension_for("application/pdf"), "pdf");
        assert_eq!(extension_for("image/avif"), "avif");
        assert_eq!(extension_for("audio/wav"), "wav");
        assert_eq!(extension_for("application/x-unknown"), "bin");
    }

    #[test]
    fn guesses_from_paths_and_urls() {
        assert_eq!(from_path("https://cdn.example.com/cat.JPEG?w=200"), "image/jpeg");
        assert_eq!(from_path("/tmp/report.pdf"), "application/pdf");
        assert_eq!(from_path("/tmp/clip.webm"), "video/webm");
        assert_eq!(from_path("/tmp/scan.tiff"), "image/tiff");
        assert_eq!(from_path("/tmp/noext"), OCTET_STREAM);
    }

    #[test]
    fn essence_drops_parameters() {
        assert_eq!(essence("Text/Plain; charset=utf-8"), "text/plain");
    }
}
