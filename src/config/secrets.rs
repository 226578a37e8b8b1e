//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides helpers for working with
//! secrets in the meterwatch context.

pub use secrecy::{ExposeSecret, SecretString};

/// Render a connection URL for logs with the password masked.
pub fn redact_url(url: &SecretString) -> String {
    let raw = url.expose_secret();
    match (raw.find("://"), raw.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let creds = &raw[scheme_end + 3..at];
            let user = creds.split(':').next().unwrap_or("");
            format!("{}{user}:***{}", &raw[..scheme_end + 3], &raw[at..])
        }
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_password() {
        let url = SecretString::from("postgres://meter:hunter2@db:5432/meter");
        assert_eq!(redact_url(&url), "postgres://meter:***@db:5432/meter");
    }

    #[test]
    fn leaves_credential_free_urls_alone() {
        let url = SecretString::from("postgres://db/meter");
        assert_eq!(redact_url(&url), "postgres://db/meter");
    }
}
