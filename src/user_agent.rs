//! User-Agent string sent with every request.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/repofetch";

/// Default User-Agent for API and file requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("repofetch/{version} (+{PROJECT_UA_URL})")
}
