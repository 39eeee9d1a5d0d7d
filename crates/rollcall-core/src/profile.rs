//! Users and their editable profile fields.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::PayloadError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("face profile holds at most {max} embeddings, got {count}")]
    TooManyEmbeddings { count: usize, max: usize },
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("invalid {field}: {message}")]
    InvalidField { field: &'static str, message: String },
    #[error("email already registered: {0}")]
    EmailTaken(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<PayloadError> for ProfileError {
    fn from(e: PayloadError) -> Self {
        Self::MalformedInput(e.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Tutor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Tutor => "tutor",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "tutor" => Ok(Self::Tutor),
            other => Err(format!("unknown role: {other} (expected student or tutor)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown gender: {other}")),
        }
    }
}

/// A registered platform user. Face embeddings and attendance are stored
/// separately and fetched on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Gender,
    /// Hosted image URL; empty when unset.
    pub profile_image: String,
    pub created_at: DateTime<Utc>,
}

/// Registration request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Gender,
}

impl NewUser {
    /// Validate and stamp a fresh id.
    pub fn into_user(self, now: DateTime<Utc>) -> Result<User, ProfileError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ProfileError::InvalidField {
                field: "name",
                message: "name is required".into(),
            });
        }
        let email = self.email.trim();
        validate_email(email)?;

        Ok(User {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role: self.role,
            date_of_birth: self.date_of_birth,
            gender: self.gender,
            profile_image: String::new(),
            created_at: now,
        })
    }
}

/// Partial profile edit; `None` keeps the current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub profile_image: Option<String>,
}

impl ProfileUpdate {
    /// Apply onto `user`. Blank strings count as absent.
    pub fn apply(self, user: &mut User) {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            user.name = name.to_string();
        }
        if let Some(dob) = self.date_of_birth {
            user.date_of_birth = Some(dob);
        }
        if let Some(gender) = self.gender {
            user.gender = gender;
        }
        if let Some(url) = self.profile_image.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            user.profile_image = url.to_string();
        }
    }
}

/// Accepts `local@domain.tld` with no whitespace anywhere.
pub fn validate_email(email: &str) -> Result<(), ProfileError> {
    let invalid = || ProfileError::InvalidField {
        field: "email",
        message: format!("invalid email format: {email:?}"),
    };

    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() {
        return Err(invalid());
    }
    // Last dot in the domain must have text on both sides.
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        NewUser {
            name: "Ada".into(),
            email: "ada@example.org".into(),
            ..Default::default()
        }
        .into_user(Utc::now())
        .unwrap()
    }

    #[test]
    fn test_email_validation() {
        for ok in ["a@b.c", "first.last@school.edu", "x+y@sub.domain.io"] {
            assert!(validate_email(ok).is_ok(), "rejected {ok}");
        }
        for bad in ["", "plain", "@b.c", "a@b", "a@.c", "a@b.", "a b@c.d", "a@b c.d"] {
            assert!(validate_email(bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn test_new_user_defaults() {
        let u = user();
        assert_eq!(u.role, Role::Student);
        assert_eq!(u.gender, Gender::Other);
        assert!(u.profile_image.is_empty());
        assert!(uuid::Uuid::parse_str(&u.id).is_ok());
    }

    #[test]
    fn test_new_user_requires_name() {
        let err = NewUser {
            name: "   ".into(),
            email: "a@b.c".into(),
            ..Default::default()
        }
        .into_user(Utc::now())
        .unwrap_err();
        assert!(matches!(err, ProfileError::InvalidField { field: "name", .. }));
    }

    #[test]
    fn test_update_keeps_absent_fields() {
        let mut u = user();
        ProfileUpdate {
            gender: Some(Gender::Female),
            name: Some("  ".into()),
            ..Default::default()
        }
        .apply(&mut u);
        assert_eq!(u.name, "Ada");
        assert_eq!(u.gender, Gender::Female);
        assert_eq!(u.date_of_birth, None);
    }

    #[test]
    fn test_update_from_json() {
        let update: ProfileUpdate =
            serde_json::from_str(r#"{"name": "Grace", "date_of_birth": "1990-12-09"}"#).unwrap();
        let mut u = user();
        update.apply(&mut u);
        assert_eq!(u.name, "Grace");
        assert_eq!(u.date_of_birth, NaiveDate::from_ymd_opt(1990, 12, 9));
    }

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!("tutor".parse::<Role>().unwrap(), Role::Tutor);
        assert_eq!(Role::Tutor.as_str(), "tutor");
        assert!("admin".parse::<Role>().is_err());
    }
}
