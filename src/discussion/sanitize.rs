/// Cleans user-supplied comment content before it is stored and pushed
pub trait ContentSanitizer: Send + Sync + 'static {
    fn sanitize(&self, input: &str) -> String;
}

/// Allowlist HTML cleaner for rich-text comments.
///
/// Keeps ammonia's default safe tags plus `<u>`. Scripts and styles are
/// dropped together with their content, event handler attributes are removed.
pub struct HtmlSanitizer {
    cleaner: ammonia::Builder<'static>,
}

impl HtmlSanitizer {
    pub fn new() -> Self {
        let mut cleaner = ammonia::Builder::default();
        cleaner.add_tags(&["u"]);
        Self { cleaner }
    }
}

impl Default for HtmlSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentSanitizer for HtmlSanitizer {
    fn sanitize(&self, input: &str) -> String {
        self.cleaner.clean(input).to_string()
    }
}
