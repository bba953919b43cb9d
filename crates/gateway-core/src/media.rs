// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Final-text post-processing shared by every `RunAgent` call: rewriting
//! `{{media:<path>}}` tokens into a wire-friendly form, and detecting the
//! suppression tokens a reply uses to opt out of delivery entirely.

use std::path::Path;

/// Literal, case-insensitive substrings that suppress delivery of a reply —
/// used by heartbeats and other system-event sources that only want to speak
/// up when something is actually wrong.
const SUPPRESSION_TOKENS: &[&str] = &["SILENT_OK", "HEARTBEAT_OK", "NO_REPLY", "EVENT_OK"];

/// True if `text` contains any built-in suppression token, or `extra` (the
/// caller's own `SuppressDeliveryOn` string, skipped if empty).
pub fn is_suppressed(text: &str, extra: &str) -> bool {
    let upper = text.to_uppercase();
    if SUPPRESSION_TOKENS.iter().any(|tok| upper.contains(tok)) {
        return true;
    }
    !extra.is_empty() && upper.contains(&extra.to_uppercase())
}

/// Rewrite every `{{media:<path>}}` token in `text` to
/// `{{media:<mime>:'<escaped-path>'}}` when `<path>` resolves to an existing
/// file under `media_root`. Tokens whose path doesn't exist, or that look
/// like ordinary conversational text (no `/` and no `.`), are left alone.
pub fn enrich_media_tokens(text: &str, media_root: &Path) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{media:") {
        let Some(end_rel) = rest[start..].find("}}") else {
            out.push_str(rest);
            return out;
        };
        let end = start + end_rel;
        let path_str = &rest[start + "{{media:".len()..end];

        out.push_str(&rest[..start]);
        if looks_like_path(path_str) {
            let full = media_root.join(path_str);
            if full.is_file() {
                let mime = guess_mime(path_str);
                let escaped = escape_path(path_str);
                out.push_str(&format!("{{{{media:{mime}:'{escaped}'}}}}"));
            } else {
                out.push_str(&rest[start..end + 2]);
            }
        } else {
            out.push_str(&rest[start..end + 2]);
        }
        rest = &rest[end + 2..];
    }
    out.push_str(rest);
    out
}

/// A token only counts as a path reference if it looks like one — has a `/`
/// or a `.`. Bare words (`{{media:whatever}}` typed by a user, not the
/// model) are left as plain text rather than probed against the filesystem.
fn looks_like_path(s: &str) -> bool {
    s.contains('/') && s.contains('.')
}

fn escape_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace('\'', "\\'")
}

fn guess_mime(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
