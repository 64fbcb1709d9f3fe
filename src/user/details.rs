//! Incoming user details, validated before reaching a [`User`](super::User).

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::user::Role;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[^@\s]+@(?:[-a-z0-9]+\.)+[a-z]{2,}$").unwrap()
});

static PASSWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S{8,72}$").unwrap());

/// Field of user details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The document itself.
    Details,
    Username,
    Emails,
    Password,
    Roles,
    TermsAccepted,
    EmailVerified,
    TokenDuration,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Details => "details",
            Field::Username => "username",
            Field::Emails => "emails",
            Field::Password => "password",
            Field::Roles => "roles",
            Field::TermsAccepted => "termsAccepted",
            Field::EmailVerified => "emailVerified",
            Field::TokenDuration => "tokenDuration",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Missing,
    Invalid,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Missing => f.write_str("missing"),
            Reason::Invalid => f.write_str("invalid"),
        }
    }
}

/// First offending field of some details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{field} is {reason}")]
pub struct ValidationError {
    pub field: Field,
    pub reason: Reason,
}

impl ValidationError {
    pub fn missing(field: Field) -> Self {
        Self {
            field,
            reason: Reason::Missing,
        }
    }

    pub fn invalid(field: Field) -> Self {
        Self {
            field,
            reason: Reason::Invalid,
        }
    }
}

type Result<T> = std::result::Result<T, ValidationError>;

/// Check an email address syntax.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Check the password policy: 8 to 72 non-whitespace characters.
pub fn is_valid_password(password: &str) -> bool {
    PASSWORD_RE.is_match(password)
}

/// Check a full timestamp such as `2016-01-01T01:23:45-08:00`.
pub fn is_valid_timestamp(timestamp: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(timestamp).is_ok()
}

fn validate_username(username: &str) -> Result<()> {
    if is_valid_email(username) {
        Ok(())
    } else {
        Err(ValidationError::invalid(Field::Username))
    }
}

fn validate_emails(emails: &[String]) -> Result<()> {
    if emails.iter().all(|email| is_valid_email(email)) {
        Ok(())
    } else {
        Err(ValidationError::invalid(Field::Emails))
    }
}

fn validate_password(password: &str) -> Result<()> {
    if is_valid_password(password) {
        Ok(())
    } else {
        Err(ValidationError::invalid(Field::Password))
    }
}

fn parse_roles(roles: &[String]) -> Result<Vec<Role>> {
    roles
        .iter()
        .map(|role| role.parse::<Role>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| ValidationError::invalid(Field::Roles))
}

/// Parse a JSON document into an object.
fn parse_object(body: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ValidationError::missing(Field::Details)),
    }
}

/// Extract an optional, typed `field` of `map`.
fn extract<T: DeserializeOwned>(
    map: &mut Map<String, Value>,
    field: Field,
) -> Result<Option<T>> {
    match map.remove(field.as_str()) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|_| ValidationError::invalid(field)),
    }
}

/// Details to create a standard user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUserDetails {
    pub username: Option<String>,
    pub emails: Vec<String>,
    pub password: Option<String>,
    /// `None` means the default role set.
    pub roles: Option<Vec<String>>,
}

impl NewUserDetails {
    /// Extract details from a JSON body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let mut map = parse_object(body)?;

        Ok(Self {
            username: extract(&mut map, Field::Username)?,
            emails: extract(&mut map, Field::Emails)?.unwrap_or_default(),
            password: extract(&mut map, Field::Password)?,
            roles: extract(&mut map, Field::Roles)?,
        })
    }

    /// Validate fields in order: username, emails, password, roles.
    ///
    /// Returns the parsed roles.
    pub fn validate(&self) -> Result<Option<Vec<Role>>> {
        let username = self
            .username
            .as_deref()
            .ok_or(ValidationError::missing(Field::Username))?;
        validate_username(username)?;

        if self.emails.is_empty() {
            return Err(ValidationError::missing(Field::Emails));
        }
        validate_emails(&self.emails)?;

        let password = self
            .password
            .as_deref()
            .ok_or(ValidationError::missing(Field::Password))?;
        validate_password(password)?;

        self.roles.as_deref().map(parse_roles).transpose()
    }
}

/// Details to create a custodial user, on behalf of someone else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCustodialUserDetails {
    pub username: Option<String>,
    pub emails: Option<Vec<String>>,
}

impl NewCustodialUserDetails {
    /// Extract details from a JSON body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let mut map = parse_object(body)?;

        Ok(Self {
            username: extract(&mut map, Field::Username)?,
            emails: extract(&mut map, Field::Emails)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        if let Some(emails) = &self.emails {
            validate_emails(emails)?;
        }

        Ok(())
    }
}

/// Partial update of a user. Only supplied fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateUserDetails {
    pub username: Option<String>,
    pub emails: Option<Vec<String>>,
    pub password: Option<String>,
    pub roles: Option<Vec<String>>,
    pub terms_accepted: Option<String>,
    pub email_verified: Option<bool>,
}

impl UpdateUserDetails {
    /// Extract details from a JSON body shaped as `{"updates": {..}}`.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let mut map = parse_object(body)?;
        let mut map = match map.remove("updates") {
            Some(Value::Object(updates)) => updates,
            _ => return Err(ValidationError::missing(Field::Details)),
        };

        Ok(Self {
            username: extract(&mut map, Field::Username)?,
            emails: extract(&mut map, Field::Emails)?,
            password: extract(&mut map, Field::Password)?,
            roles: extract(&mut map, Field::Roles)?,
            terms_accepted: extract(&mut map, Field::TermsAccepted)?,
            email_verified: extract(&mut map, Field::EmailVerified)?,
        })
    }

    /// Validate supplied fields. Returns the parsed roles, if any.
    pub fn validate(&self) -> Result<Option<Vec<Role>>> {
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        if let Some(emails) = &self.emails {
            validate_emails(emails)?;
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        let roles = self.roles.as_deref().map(parse_roles).transpose()?;
        if let Some(terms) = &self.terms_accepted {
            if !is_valid_timestamp(terms) {
                return Err(ValidationError::invalid(Field::TermsAccepted));
            }
        }

        Ok(roles)
    }

    /// Whether the update touches privileged fields.
    pub fn is_privileged(&self) -> bool {
        self.roles.is_some() || self.email_verified.is_some()
    }
}
