use chrono::Utc;

pub fn is_safe_key_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')
}

pub fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|ch| if is_safe_key_char(ch) { ch } else { '_' })
        .collect()
}

/// Tenant ids become the first path segment of every key, so they are
/// restricted to the same character set as sanitized file names.
pub fn is_valid_tenant_id(tenant_id: &str) -> bool {
    !tenant_id.is_empty() && tenant_id.chars().all(is_safe_key_char)
}

/// `{tenant}/{unix_millis}_{sanitized_name}`. Two uploads of the same name
/// for the same tenant within one millisecond produce the same key.
pub fn generate_storage_key(tenant_id: &str, file_name: &str) -> String {
    storage_key_at(tenant_id, file_name, Utc::now().timestamp_millis())
}

pub fn storage_key_at(tenant_id: &str, file_name: &str, unix_millis: i64) -> String {
    format!(
        "{tenant_id}/{unix_millis}_{}",
        sanitize_file_name(file_name)
    )
}
