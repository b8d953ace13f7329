use std::path::Path;

const OCTET_STREAM: &str = "application/octet-stream";

/// Guesses a `Content-Type` from the file extension.
///
/// Unknown or missing extensions are served as `application/octet-stream`.
pub fn content_type(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return OCTET_STREAM;
    };

    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "txt" | "toml" | "rs" => "text/plain",
        "md" => "text/markdown",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        _ => OCTET_STREAM,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_extension() {
        assert_eq!(content_type(Path::new("index.html")), "text/html");
        assert_eq!(content_type(Path::new("a/b/PHOTO.JPG")), "image/jpeg");
        assert_eq!(content_type(Path::new("Cargo.toml")), "text/plain");
    }

    #[test]
    fn unknown_extension() {
        assert_eq!(content_type(Path::new("archive.tar.zst")), OCTET_STREAM);
        assert_eq!(content_type(Path::new("Makefile")), OCTET_STREAM);
    }
}
