//! MIME type detection.
//!
//! Returns the Content-Type for a file extension. A handful of overrides sit
//! on top of the general table: `mjs` is served as `text/javascript`, `ttf`
//! as `application/font-sfnt`, and compiled `sass` sources as `text/css`.

/// Get the MIME Content-Type for a request path or public route pattern.
pub fn content_type_for(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    let ext = name.contains('.').then(|| name.rsplit('.').next()).flatten();
    get_content_type(ext)
}

/// Get the MIME Content-Type for a file extension.
pub fn get_content_type(extension: Option<&str>) -> &'static str {
    match extension {
        // Overrides
        Some("mjs") => "text/javascript",
        Some("ttf") => "application/font-sfnt",
        Some("sass" | "scss") => "text/css",

        // Text
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("txt" | "md") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",

        // JavaScript/WASM
        Some("js") => "application/javascript",
        Some("json" | "webmanifest") => "application/json",
        Some("wasm") => "application/wasm",

        // Images
        Some("png" | "PNG") => "image/png",
        Some("jpg" | "jpeg" | "JPG" | "JPEG") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",

        // Video
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("ogg" | "ogv") => "video/ogg",

        // Audio
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",

        // Fonts
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("otf") => "font/otf",

        // Documents
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz" | "gzip") => "application/gzip",

        // Default
        _ => "application/octet-stream",
    }
}
