//! Extraction of the analytics identifier embedded in remote job names.

use regex::Regex;

const CROCKFORD: &str = "0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const ULID_LEN: usize = 26;

/// Returns the ULID suffix of a `{prefix}-{environment}-{ULID}` job name.
pub fn extract_ulid<'a>(
    job_name: &'a str,
    prefix: &str,
    environment: &str,
) -> Option<&'a str> {
    if job_name.is_empty() {
        return None;
    }
    let pattern = format!(
        "^{}-{}-([{CROCKFORD}]{{{ULID_LEN}}})$",
        regex::escape(prefix),
        regex::escape(environment),
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(job_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
