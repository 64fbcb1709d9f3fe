//! User roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role granted to a [`User`](crate::user::User).
///
/// Ordering is alphabetical, which is the order roles are persisted in.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Clinic,
    Guest,
    Patient,
}

impl Role {
    /// Every known role.
    pub const ALL: [Role; 4] = [Role::Admin, Role::Clinic, Role::Guest, Role::Patient];

    /// Returns the role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Clinic => "clinic",
            Role::Guest => "guest",
            Role::Patient => "patient",
        }
    }
}

/// Role name outside of the allowed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_owned()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("clinic".parse::<Role>(), Ok(Role::Clinic));
        assert_eq!("patient".parse::<Role>(), Ok(Role::Patient));
        assert!("superadmin".parse::<Role>().is_err());
        // names are case sensitive.
        assert!("Admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&[Role::Admin, Role::Guest]).unwrap();
        assert_eq!(json, r#"["admin","guest"]"#);
    }
}
