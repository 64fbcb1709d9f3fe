mod details;
mod repository;
mod role;

pub use details::*;
pub use repository::*;
pub use role::*;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::crypto::{self, CredentialHasher, CryptoError};
use crate::lockout::{self, FailedLoginInfos};

/// Length of generated user ids.
pub const ID_LENGTH: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to derive user credentials")]
    Credential(#[from] CryptoError),
}

/// A derived credential. Never printed nor serialized.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Returns the same string as a string slice `&str`.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHash")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// User as saved on the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    /// First email is the primary contact.
    pub emails: Vec<String>,
    pub roles: Vec<Role>,
    /// RFC3339 timestamp, empty until terms are accepted.
    pub terms_accepted: String,
    pub email_verified: bool,
    pub password_hash: PasswordHash,
    /// Absent until the first failed login.
    pub failed_login: Option<FailedLoginInfos>,
    pub created_time: Option<String>,
    pub created_user_id: Option<String>,
    pub modified_time: Option<String>,
    pub modified_user_id: Option<String>,
    pub deleted_time: Option<String>,
    pub deleted_user_id: Option<String>,
}

impl User {
    /// Create a standard user from untrusted details.
    ///
    /// Roles default to `patient`. The id is a unique hash over the
    /// username, the password and the roles.
    pub fn new(details: &NewUserDetails, hasher: &CredentialHasher) -> Result<Self, UserError> {
        let roles = details.validate()?.unwrap_or_else(|| vec![Role::Patient]);
        // validated above.
        let username = details.username.clone().unwrap_or_default();
        let password = details.password.as_deref().unwrap_or_default();

        let joined_roles = roles
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(";");
        let id = crypto::generate_unique_hash(&[&username, password, &joined_roles], ID_LENGTH)?;
        let password_hash = PasswordHash::new(hasher.hash(&id, password)?);

        Ok(Self {
            id,
            username,
            emails: details.emails.clone(),
            roles,
            password_hash,
            ..Default::default()
        })
    }

    /// Create a custodial user, which has neither password nor
    /// mandatory email.
    pub fn new_custodial(details: &NewCustodialUserDetails) -> Result<Self, UserError> {
        details.validate()?;

        let username = details.username.clone().unwrap_or_default();
        let id = crypto::generate_unique_hash(&[&username], ID_LENGTH)?;

        Ok(Self {
            id,
            username,
            emails: details.emails.clone().unwrap_or_default(),
            roles: vec![Role::Guest],
            ..Default::default()
        })
    }

    /// Validate and apply supplied fields of `details`.
    ///
    /// A new password is hashed against the existing id. Only guests may
    /// end up without email.
    pub fn apply_update(
        &mut self,
        details: &UpdateUserDetails,
        hasher: &CredentialHasher,
    ) -> Result<(), UserError> {
        let roles = details.validate()?;

        let is_guest = roles.as_ref().unwrap_or(&self.roles).contains(&Role::Guest);
        if details.emails.as_ref().is_some_and(Vec::is_empty) && !is_guest {
            return Err(ValidationError::missing(Field::Emails).into());
        }

        if let Some(password) = &details.password {
            self.password_hash = PasswordHash::new(hasher.hash(&self.id, password)?);
        }
        if let Some(username) = &details.username {
            self.username = username.clone();
        }
        if let Some(emails) = &details.emails {
            self.emails = emails.clone();
        }
        if let Some(roles) = roles {
            self.roles = roles;
        }
        if let Some(terms) = &details.terms_accepted {
            self.terms_accepted = terms.clone();
        }
        if let Some(verified) = details.email_verified {
            self.email_verified = verified;
        }

        Ok(())
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_clinic(&self) -> bool {
        self.has_role(Role::Clinic)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_time.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether the email is verified.
    ///
    /// A non-empty `bypass_secret` found in the username or any email
    /// counts as verified, for test and operation accounts.
    pub fn is_email_verified(&self, bypass_secret: &str) -> bool {
        if !bypass_secret.is_empty()
            && (self.username.contains(bypass_secret)
                || self.emails.iter().any(|email| email.contains(bypass_secret)))
        {
            return true;
        }

        self.email_verified
    }

    /// Check `password` against the stored credential.
    pub fn passwords_match(&self, password: &str, hasher: &CredentialHasher) -> bool {
        hasher.verify(self.password_hash.as_str(), &self.id, password)
    }

    /// Whether a login may be attempted right now.
    pub fn can_perform_login(&self, max_failed_login: u32) -> bool {
        self.can_perform_login_at(max_failed_login, Utc::now())
    }

    pub fn can_perform_login_at(&self, max_failed_login: u32, now: DateTime<Utc>) -> bool {
        lockout::can_attempt_login(self.failed_login.as_ref(), max_failed_login, now)
    }

    /// External representation of the user.
    ///
    /// `passwordExists` is only disclosed to servers.
    pub fn to_serializable(&self, is_server: bool) -> SerializableUser {
        let has_contact = !self.username.is_empty() || !self.emails.is_empty();

        SerializableUser {
            id: self.id.clone(),
            username: self.username.clone(),
            emails: self.emails.clone(),
            roles: self.roles.clone(),
            terms_accepted: self.terms_accepted.clone(),
            email_verified: has_contact.then_some(self.email_verified),
            password_exists: is_server.then(|| !self.password_hash.is_empty()),
        }
    }
}

/// User as exposed outside of the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializableUser {
    #[serde(rename = "userid", skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<Role>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub terms_accepted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_exists: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &str = "some fake salt for the tests";

    fn new_details(username: &str, password: &str) -> NewUserDetails {
        NewUserDetails {
            username: Some(username.into()),
            emails: vec![username.into()],
            password: Some(password.into()),
            roles: None,
        }
    }

    #[test]
    fn test_new_user_defaults() {
        let hasher = CredentialHasher::new(SALT);
        let user = User::new(&new_details("a@b.com", "abcd1234"), &hasher).unwrap();

        assert_eq!(user.roles, vec![Role::Patient]);
        assert_eq!(user.id.len(), ID_LENGTH);
        assert!(!user.password_hash.is_empty());
        assert_ne!(user.password_hash.as_str(), "abcd1234");
        assert!(user.passwords_match("abcd1234", &hasher));
        assert!(!user.passwords_match("abcd12345", &hasher));
        assert!(user.failed_login.is_none());
        assert!(!user.email_verified);
    }

    #[test]
    fn test_new_user_ids_are_unique() {
        let hasher = CredentialHasher::new(SALT);
        let details = new_details("a@b.com", "abcd1234");

        let first = User::new(&details, &hasher).unwrap();
        let second = User::new(&details, &hasher).unwrap();
        assert_ne!(first.id, second.id);
        assert_ne!(first.password_hash, second.password_hash);
    }

    #[test]
    fn test_new_user_validation() {
        let hasher = CredentialHasher::new(SALT);

        let err = User::new(&new_details("not-an-email", "abcd1234"), &hasher).unwrap_err();
        assert!(matches!(err, UserError::Validation(e) if e.field == Field::Username));

        let err = User::new(&new_details("a@b.com", "short"), &hasher).unwrap_err();
        assert!(matches!(err, UserError::Validation(e) if e.field == Field::Password));

        let mut details = new_details("a@b.com", "abcd1234");
        details.roles = Some(vec!["superadmin".into()]);
        let err = User::new(&details, &hasher).unwrap_err();
        assert!(matches!(err, UserError::Validation(e) if e.field == Field::Roles));

        // password boundaries.
        assert!(User::new(&new_details("a@b.com", &"x".repeat(8)), &hasher).is_ok());
        assert!(User::new(&new_details("a@b.com", &"x".repeat(72)), &hasher).is_ok());
    }

    #[test]
    fn test_new_user_without_salt() {
        let err = User::new(&new_details("a@b.com", "abcd1234"), &CredentialHasher::new(""))
            .unwrap_err();
        assert!(matches!(err, UserError::Credential(CryptoError::MissingSalt)));
    }

    #[test]
    fn test_custodial_user() {
        let user = User::new_custodial(&NewCustodialUserDetails::default()).unwrap();
        assert_eq!(user.roles, vec![Role::Guest]);
        assert_eq!(user.id.len(), ID_LENGTH);
        assert!(user.emails.is_empty());
        assert!(user.password_hash.is_empty());

        let user = User::new_custodial(&NewCustodialUserDetails {
            username: Some("kid@family.org".into()),
            emails: Some(vec!["kid@family.org".into()]),
        })
        .unwrap();
        assert_eq!(user.username, "kid@family.org");
        // a custodial user cannot log in.
        assert!(!user.passwords_match("anything", &CredentialHasher::new(SALT)));
    }

    #[test]
    fn test_apply_update() {
        let hasher = CredentialHasher::new(SALT);
        let mut user = User::new(&new_details("a@b.com", "abcd1234"), &hasher).unwrap();
        let id = user.id.clone();

        user.apply_update(
            &UpdateUserDetails {
                password: Some("newpassword".into()),
                roles: Some(vec!["clinic".into()]),
                terms_accepted: Some("2016-01-01T01:23:45-08:00".into()),
                email_verified: Some(true),
                ..Default::default()
            },
            &hasher,
        )
        .unwrap();

        assert_eq!(user.id, id);
        assert!(user.passwords_match("newpassword", &hasher));
        assert!(!user.passwords_match("abcd1234", &hasher));
        assert!(user.is_clinic());
        assert!(user.email_verified);
        assert_eq!(user.terms_accepted, "2016-01-01T01:23:45-08:00");
        assert_eq!(user.username, "a@b.com");

        let before = user.clone();
        let err = user
            .apply_update(
                &UpdateUserDetails {
                    username: Some("a@b.com".into()),
                    terms_accepted: Some("2016-01-01".into()),
                    ..Default::default()
                },
                &hasher,
            )
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(e) if e.field == Field::TermsAccepted));
        assert_eq!(user, before);

        // standard users keep at least one email.
        let err = user
            .apply_update(
                &UpdateUserDetails {
                    emails: Some(Vec::new()),
                    ..Default::default()
                },
                &hasher,
            )
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(e) if e.field == Field::Emails));
        assert_eq!(user, before);

        let mut guest = User::new_custodial(&NewCustodialUserDetails {
            username: Some("kid@b.com".into()),
            emails: Some(vec!["kid@b.com".into()]),
        })
        .unwrap();
        guest
            .apply_update(
                &UpdateUserDetails {
                    emails: Some(Vec::new()),
                    ..Default::default()
                },
                &hasher,
            )
            .unwrap();
        assert!(guest.emails.is_empty());
    }

    #[test]
    fn test_predicates() {
        let mut user = User {
            username: "qa+bypass@b.com".into(),
            emails: vec!["qa@b.com".into()],
            roles: vec![Role::Clinic, Role::Admin],
            ..Default::default()
        };

        assert!(user.has_role(Role::Admin));
        assert!(user.is_clinic());
        assert!(!user.has_role(Role::Patient));

        assert!(!user.is_email_verified(""));
        assert!(user.is_email_verified("+bypass"));
        assert!(!user.is_email_verified("other"));
        user.email_verified = true;
        assert!(user.is_email_verified(""));

        assert!(!user.is_deleted());
        user.deleted_time = Some(String::new());
        assert!(!user.is_deleted());
        user.deleted_time = Some("2024-01-01T00:00:00Z".into());
        assert!(user.is_deleted());

        assert!(user.can_perform_login(5));
    }

    #[test]
    fn test_serialization_hides_credentials() {
        let hasher = CredentialHasher::new(SALT);
        let user = User::new(&new_details("a@b.com", "abcd1234"), &hasher).unwrap();

        let public = serde_json::to_value(user.to_serializable(false)).unwrap();
        assert_eq!(public["userid"], user.id.as_str());
        assert_eq!(public["username"], "a@b.com");
        assert_eq!(public["roles"], serde_json::json!(["patient"]));
        assert_eq!(public["emailVerified"], false);
        assert!(public.get("passwordExists").is_none());
        assert!(public.get("termsAccepted").is_none());
        assert!(!public.to_string().contains(user.password_hash.as_str()));

        let private = serde_json::to_value(user.to_serializable(true)).unwrap();
        assert_eq!(private["passwordExists"], true);

        let custodial = User::new_custodial(&NewCustodialUserDetails::default()).unwrap();
        let view = serde_json::to_value(custodial.to_serializable(true)).unwrap();
        assert!(view.get("emailVerified").is_none());
        assert!(view.get("username").is_none());
        assert_eq!(view["passwordExists"], false);
    }
}
