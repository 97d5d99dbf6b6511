pub mod lsp_client;

/// Convenience: build a `file://` URI from an absolute path string.
#[allow(dead_code)]
pub fn file_uri(path: &std::path::Path) -> String {
    format!("file://{}", path.display())
}
