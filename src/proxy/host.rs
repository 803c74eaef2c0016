// ABOUTME: Subdomain extraction from the request Host header.
// ABOUTME: First label routes to a tenant; reserved labels never do.

/// First labels that belong to the platform, never to a tenant.
const RESERVED_LABELS: &[&str] = &["www", "api", "app", "admin", "dashboard", "auth"];

/// Extract the candidate subdomain from a Host header value.
///
/// The port is stripped; with three or more labels the first is the
/// subdomain; with exactly two the first is only a subdomain when the second
/// is `localhost`.
pub fn extract_subdomain(host: &str) -> Option<&str> {
    let host = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();

    match labels.len() {
        n if n >= 3 => Some(labels[0]),
        2 if labels[1] == "localhost" => Some(labels[0]),
        _ => None,
    }
}

/// The tenant subdomain for this Host, or `None` when the request belongs to
/// the platform itself.
pub fn tenant_subdomain(host: &str) -> Option<&str> {
    extract_subdomain(host).filter(|label| !RESERVED_LABELS.contains(label))
}
