//! PAT-based credential for Azure DevOps.
//!
//! Azure DevOps accepts a Personal Access Token as the password half of HTTP
//! Basic authentication with an empty user name.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};

/// PAT-based credential for Azure DevOps authentication.
///
/// The PAT is stored in a `SecretString` and only exposed while building the
/// `Authorization` header value.
///
/// # Example
///
/// ```rust
/// use devops_pacer::api::PatCredential;
/// use secrecy::SecretString;
///
/// let credential = PatCredential::new(SecretString::from("your-pat-token".to_string()));
/// assert!(format!("{credential:?}").contains("[REDACTED]"));
/// ```
#[derive(Clone)]
pub struct PatCredential {
    pat: SecretString,
}

impl PatCredential {
    pub fn new(pat: SecretString) -> Self {
        Self { pat }
    }

    /// Creates a new PAT credential from a plain string.
    pub fn from_string(pat: String) -> Self {
        Self {
            pat: SecretString::from(pat),
        }
    }

    /// The value for the `Authorization` header: `Basic base64(":" + pat)`.
    pub fn authorization_value(&self) -> SecretString {
        let encoded = STANDARD.encode(format!(":{}", self.pat.expose_secret()));
        SecretString::from(format!("Basic {encoded}"))
    }
}

impl std::fmt::Debug for PatCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatCredential")
            .field("pat", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// # PatCredential Redaction
    ///
    /// Tests that the Debug output never includes the token.
    ///
    /// ## Test Scenario
    /// - Creates credentials from a SecretString and from a plain string
    ///
    /// ## Expected Outcome
    /// - Debug output is redacted in both cases
    #[test]
    fn test_pat_credential_redacted() {
        let credential = PatCredential::new(SecretString::from("test-pat".to_string()));
        let debug = format!("{:?}", credential);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("test-pat"));

        let credential = PatCredential::from_string("other-pat".to_string());
        assert!(!format!("{:?}", credential).contains("other-pat"));
    }

    /// # Basic Authorization Value
    ///
    /// Tests the header value encoding expected by Azure DevOps.
    ///
    /// ## Expected Outcome
    /// - `":pat"` base64-encoded behind the `Basic` scheme
    #[test]
    fn test_authorization_value() {
        let credential = PatCredential::from_string("abc".to_string());
        let value = credential.authorization_value();
        assert_eq!(value.expose_secret(), "Basic OmFiYw==");
    }
}
