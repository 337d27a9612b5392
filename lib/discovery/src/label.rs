/// The label holds the `host:port` a scraper connects to.
pub const ADDRESS_LABEL: &str = "__address__";

/// Labels with this prefix are descriptive only and dropped after relabeling.
pub const META_LABEL_PREFIX: &str = "__meta_";

#[inline]
const fn invalid_label_name_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_].
    !(c.is_ascii_alphanumeric() || c == '_')
}

/// Replaces every character which is not allowed in a label name with `_`.
///
/// Each invalid character is replaced by exactly one underscore, multi-byte
/// characters included, so `"cost-center"` becomes `"cost_center"` and
/// `"环境"` becomes `"__"`.
pub fn sanitize_label_name(name: &str) -> String {
    name.replace(invalid_label_name_character, "_")
}
