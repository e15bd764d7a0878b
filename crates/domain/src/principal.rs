//! Principal domain types and validation rules.
//!
//! Follows OWASP Authentication and Password Storage cheat sheets for all
//! password strength and email validation rules.

use std::str::FromStr;

use clavis_core::{AppError, AppResult, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random user identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a user identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// The authority plane a principal belongs to.
///
/// SYSTEM principals operate the platform; TENANT principals operate one
/// organization; SERVICE principals are machine clients scoped like TENANT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    /// Platform operator.
    System,
    /// Organization member.
    Tenant,
    /// Machine client.
    Service,
}

impl PrincipalType {
    /// Returns the storage and claim string for this principal type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Tenant => "TENANT",
            Self::Service => "SERVICE",
        }
    }
}

impl FromStr for PrincipalType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SYSTEM" => Ok(Self::System),
            "TENANT" => Ok(Self::Tenant),
            "SERVICE" => Ok(Self::Service),
            _ => Err(AppError::Validation(format!(
                "unknown principal type '{value}'"
            ))),
        }
    }
}

/// Enforces the plane invariant between a principal type and its tenant link.
///
/// SYSTEM principals must not carry a tenant; TENANT and SERVICE principals
/// must carry exactly one.
pub fn check_plane_invariant(
    principal_type: PrincipalType,
    tenant_id: Option<TenantId>,
) -> AppResult<()> {
    match (principal_type, tenant_id) {
        (PrincipalType::System, None) => Ok(()),
        (PrincipalType::System, Some(_)) => Err(AppError::Validation(
            "SYSTEM principals must not belong to a tenant".to_owned(),
        )),
        (PrincipalType::Tenant | PrincipalType::Service, Some(_)) => Ok(()),
        (PrincipalType::Tenant | PrincipalType::Service, None) => Err(AppError::Validation(
            "tenant-plane principals must belong to a tenant".to_owned(),
        )),
    }
}

/// Lifecycle status of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Account can authenticate.
    Active,
    /// Account is disabled by an administrator.
    Inactive,
    /// Account is locked after repeated failures.
    Locked,
}

impl UserStatus {
    /// Returns the storage string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Locked => "locked",
        }
    }

    /// Parses a storage string into a status.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "locked" => Ok(Self::Locked),
            _ => Err(AppError::Validation(format!(
                "unknown user status '{value}'"
            ))),
        }
    }
}

/// Validated email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Creates a validated email address.
    ///
    /// Performs basic structural validation: non-empty, contains exactly one `@`,
    /// local part and domain are non-empty, domain contains at least one `.`.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim().to_lowercase();

        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "email address must not be empty".to_owned(),
            ));
        }

        let parts: Vec<&str> = trimmed.splitn(2, '@').collect();
        if parts.len() != 2 {
            return Err(AppError::Validation(
                "email address must contain exactly one '@'".to_owned(),
            ));
        }

        let local = parts[0];
        let domain = parts[1];

        if local.is_empty() {
            return Err(AppError::Validation(
                "email local part must not be empty".to_owned(),
            ));
        }

        if domain.is_empty() || !domain.contains('.') {
            return Err(AppError::Validation(
                "email domain must contain at least one '.'".to_owned(),
            ));
        }

        if trimmed.len() > 254 {
            return Err(AppError::Validation(
                "email address must not exceed 254 characters".to_owned(),
            ));
        }

        Ok(Self(trimmed))
    }

    /// Returns the validated email string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

/// Validated login username.
///
/// Lowercased for uniqueness; 3..=64 characters from `[a-z0-9._-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    /// Creates a validated username.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim().to_lowercase();

        if trimmed.len() < 3 || trimmed.len() > 64 {
            return Err(AppError::Validation(
                "username must be between 3 and 64 characters".to_owned(),
            ));
        }

        let valid = trimmed
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '_' | '-'));
        if !valid {
            return Err(AppError::Validation(
                "username may only contain letters, digits, '.', '_' and '-'".to_owned(),
            ));
        }

        Ok(Self(trimmed))
    }

    /// Returns the validated username string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

/// Minimum password length when MFA is enabled (NIST SP800-63B).
pub const PASSWORD_MIN_LENGTH_WITH_MFA: usize = 8;

/// Minimum password length when MFA is NOT enabled (NIST SP800-63B).
pub const PASSWORD_MIN_LENGTH_WITHOUT_MFA: usize = 10;

/// Maximum password length to allow passphrases (OWASP recommendation: at least 64).
pub const PASSWORD_MAX_LENGTH: usize = 128;

/// Validates a plaintext password against OWASP and NIST rules.
///
/// - Min length depends on whether MFA is enabled for the account.
/// - Max length is 128 characters (protects against Argon2id DoS).
/// - Rejects common breached passwords from an embedded list.
pub fn validate_password(password: &str, has_mfa: bool) -> AppResult<()> {
    let char_count = password.chars().count();
    let min_length = if has_mfa {
        PASSWORD_MIN_LENGTH_WITH_MFA
    } else {
        PASSWORD_MIN_LENGTH_WITHOUT_MFA
    };

    if char_count < min_length {
        return Err(AppError::Validation(format!(
            "password must be at least {min_length} characters"
        )));
    }

    if char_count > PASSWORD_MAX_LENGTH {
        return Err(AppError::Validation(format!(
            "password must not exceed {PASSWORD_MAX_LENGTH} characters"
        )));
    }

    if is_common_password(password) {
        return Err(AppError::Validation(
            "this password is too common and has appeared in data breaches".to_owned(),
        ));
    }

    Ok(())
}

/// Checks whether a password appears in the embedded common passwords list.
fn is_common_password(password: &str) -> bool {
    let lowered = password.to_lowercase();
    COMMON_PASSWORDS.iter().any(|entry| *entry == lowered)
}

/// Top breached passwords (subset for fast embedded check).
/// Production deployments should integrate HaveIBeenPwned k-anonymity API.
static COMMON_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "12345678",
    "1234567890",
    "qwerty",
    "abc123",
    "monkey",
    "master",
    "dragon",
    "111111",
    "iloveyou",
    "trustno1",
    "sunshine",
    "princess",
    "football",
    "shadow",
    "superman",
    "qwerty123",
    "password1",
    "password123",
    "welcome",
    "login",
    "admin",
    "letmein",
    "starwars",
    "passw0rd",
    "121212",
    "access",
    "hello",
    "whatever",
    "654321",
    "7777777",
    "123123",
    "freedom",
    "1234567",
    "12345",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_email_is_accepted() {
        let email = EmailAddress::new("USER@Example.COM");
        assert!(email.is_ok());
        assert_eq!(
            email.unwrap_or_else(|_| panic!("test")).as_str(),
            "user@example.com"
        );
    }

    #[test]
    fn email_without_at_is_rejected() {
        assert!(EmailAddress::new("noatsign").is_err());
    }

    #[test]
    fn username_is_lowercased() {
        let username = Username::new("Alice.Smith");
        assert!(username.is_ok());
        assert_eq!(
            username.unwrap_or_else(|_| panic!("test")).as_str(),
            "alice.smith"
        );
    }

    #[test]
    fn username_with_spaces_is_rejected() {
        assert!(Username::new("alice smith").is_err());
    }

    #[test]
    fn short_username_is_rejected() {
        assert!(Username::new("ab").is_err());
    }

    #[test]
    fn system_principal_must_not_carry_tenant() {
        let result = check_plane_invariant(PrincipalType::System, Some(TenantId::new()));
        assert!(result.is_err());
        assert!(check_plane_invariant(PrincipalType::System, None).is_ok());
    }

    #[test]
    fn tenant_principal_must_carry_tenant() {
        let result = check_plane_invariant(PrincipalType::Tenant, None);
        assert!(result.is_err());
        assert!(check_plane_invariant(PrincipalType::Tenant, Some(TenantId::new())).is_ok());
    }

    #[test]
    fn principal_type_roundtrips_claim_string() {
        for value in [
            PrincipalType::System,
            PrincipalType::Tenant,
            PrincipalType::Service,
        ] {
            let parsed: Result<PrincipalType, _> = value.as_str().parse();
            assert_eq!(parsed.ok(), Some(value));
        }
    }

    #[test]
    fn short_password_is_rejected_without_mfa() {
        assert!(validate_password("short", false).is_err());
    }

    #[test]
    fn adequate_password_is_accepted_without_mfa() {
        assert!(validate_password("a-reasonable-passphrase", false).is_ok());
    }

    #[test]
    fn shorter_password_accepted_with_mfa() {
        assert!(validate_password("g00dPa5s", true).is_ok());
    }

    #[test]
    fn common_password_is_rejected() {
        assert!(validate_password("password123", false).is_err());
    }

    #[test]
    fn very_long_password_is_rejected() {
        let long = "a".repeat(PASSWORD_MAX_LENGTH + 1);
        assert!(validate_password(&long, false).is_err());
    }
}
