//! Remote naming rules and extension allow-lists.
//!
//! A local file `report.txt` is stored remotely as `report.txt.enc.gz`:
//! `.enc` marks the encrypted payload, `.gz` the compressed transport form.

use std::path::Path;

/// Suffix carried by every encrypted payload.
pub const ENCRYPTED_SUFFIX: &str = ".enc";
/// Suffix carried by every compressed object in the store.
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Extensions whose local edits are re-uploaded.
pub const EDITABLE_EXTENSIONS: &[&str] = &[
    "txt", "md", "doc", "docx", "odt", "rtf", "html", "htm", "xml", "csv", "json", "yaml", "yml",
    "tsv", "log", "tex", "css", "js", "jsx", "ts", "tsx", "py", "java", "c", "cpp", "cs", "sh",
    "bat", "ini", "conf", "config", "sql", "xlsx", "xls", "pptx", "ppt", "odp", "numbers",
];

/// View-only extensions that may still be opened.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "docx", "doc", "xlsx", "xls", "csv", "pdf", "webp", "gif", "mp4", "mpeg",
    "avi", "mp3", "wav", "flac", "ogg", "txt", "mov",
];

/// Strip the compression and encryption suffixes from a remote name.
///
/// `report.txt.enc.gz` -> `report.txt`. Names without the suffixes are
/// returned unchanged.
pub fn local_name(remote_name: &str) -> &str {
    let name = remote_name
        .strip_suffix(COMPRESSED_SUFFIX)
        .unwrap_or(remote_name);
    name.strip_suffix(ENCRYPTED_SUFFIX).unwrap_or(name)
}

/// Remote name for a local file name (without the compression suffix,
/// which the store adds on upload).
pub fn encrypted_name(local_name: &str) -> String {
    format!("{}{}", local_name, ENCRYPTED_SUFFIX)
}

/// Ensure a name carries the compression suffix exactly once.
pub fn compressed_name(name: &str) -> String {
    if name.ends_with(COMPRESSED_SUFFIX) {
        name.to_string()
    } else {
        format!("{}{}", name, COMPRESSED_SUFFIX)
    }
}

/// Whether a remote name refers to an encrypted payload.
pub fn is_encrypted_name(remote_name: &str) -> bool {
    remote_name
        .strip_suffix(COMPRESSED_SUFFIX)
        .unwrap_or(remote_name)
        .ends_with(ENCRYPTED_SUFFIX)
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Whether edits to a file with this local name are ever uploaded.
pub fn is_editable(local_name: &str) -> bool {
    extension_of(local_name)
        .map(|ext| EDITABLE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Whether a remote object may be opened at all.
pub fn is_openable(remote_name: &str) -> bool {
    if !is_encrypted_name(remote_name) {
        return false;
    }
    extension_of(local_name(remote_name))
        .map(|ext| {
            EDITABLE_EXTENSIONS.contains(&ext.as_str())
                || SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// MIME type used inside the data URL.
pub fn mime_for(local_name: &str) -> String {
    mime_guess::from_path(local_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_name_strips_suffixes() {
        assert_eq!(local_name("report.txt.enc.gz"), "report.txt");
        assert_eq!(local_name("report.txt.enc"), "report.txt");
        assert_eq!(local_name("report.txt"), "report.txt");
        assert_eq!(local_name("archive.tar.gz"), "archive.tar");
    }

    #[test]
    fn test_compressed_name_is_idempotent() {
        assert_eq!(compressed_name("a.txt.enc"), "a.txt.enc.gz");
        assert_eq!(compressed_name("a.txt.enc.gz"), "a.txt.enc.gz");
    }

    #[test]
    fn test_openable_requires_encryption_marker() {
        assert!(is_openable("notes.md.enc.gz"));
        assert!(is_openable("photo.PNG.enc"));
        assert!(!is_openable("notes.md.gz"));
        assert!(!is_openable("binary.exe.enc.gz"));
        assert!(!is_openable("noext.enc.gz"));
    }

    #[test]
    fn test_editable_allow_list() {
        assert!(is_editable("report.txt"));
        assert!(is_editable("Budget.XLSX"));
        assert!(!is_editable("photo.png"));
        assert!(!is_editable("README"));
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("report.txt"), "text/plain");
        assert_eq!(mime_for("unknown.zzzz"), "application/octet-stream");
    }
}
