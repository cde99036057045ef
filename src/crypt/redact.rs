/// Placeholder shown instead of any stored secret. On update requests it
/// means "keep the stored value".
pub const SENTINEL: &str = "$encrypted$";

pub fn redact(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        SENTINEL.to_string()
    }
}

pub fn is_sentinel(value: &str) -> bool {
    value == SENTINEL
}
