//! Influencer domain entity and validation.

use chrono::{DateTime, Utc};
use partnerflow_core::commands::{CreateInfluencer, PlatformProfile};
use partnerflow_core::money::{ValueError, validate_distribution, validate_percent};
use thiserror::Error;

/// Why a registration command failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A required field is empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The email does not look like an address.
    #[error("invalid email: {0}")]
    InvalidEmail(String),

    /// A platform profile carried an invalid percentage or distribution.
    #[error("invalid platform profile '{platform}': {source}")]
    InvalidProfile {
        /// Platform whose profile failed.
        platform: String,
        /// Underlying value error.
        source: ValueError,
    },
}

/// A registered influencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Influencer {
    /// External id supplied at admission.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Content categories.
    pub categories: Vec<String>,
    /// Declared platform presences.
    pub platforms: Vec<PlatformProfile>,
    /// Free-form description.
    pub description: Option<String>,
    /// Longer biography.
    pub biography: Option<String>,
    /// Personal or agency website.
    pub website: Option<String>,
    /// Contact phone.
    pub phone: Option<String>,
    /// When the registration was applied.
    pub registered_at: DateTime<Utc>,
}

impl Influencer {
    /// Build a validated influencer from a registration command.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] when a required field is empty, the
    /// email is malformed, or a platform profile carries an out-of-range
    /// engagement rate or a distribution that does not sum to 100 ±1.
    pub fn register(
        command: &CreateInfluencer,
        now: DateTime<Utc>,
    ) -> Result<Self, RegistrationError> {
        if command.influencer_id.trim().is_empty() {
            return Err(RegistrationError::MissingField("influencer_id"));
        }
        if command.name.trim().is_empty() {
            return Err(RegistrationError::MissingField("name"));
        }
        if command.categories.is_empty() {
            return Err(RegistrationError::MissingField("categories"));
        }
        validate_email(&command.email)?;
        for profile in &command.platforms {
            validate_profile(profile)?;
        }

        Ok(Self {
            id: command.influencer_id.clone(),
            name: command.name.clone(),
            email: command.email.clone(),
            categories: command.categories.clone(),
            platforms: command.platforms.clone(),
            description: command.description.clone(),
            biography: command.biography.clone(),
            website: command.website.clone(),
            phone: command.phone.clone(),
            registered_at: now,
        })
    }
}

fn validate_email(email: &str) -> Result<(), RegistrationError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(RegistrationError::InvalidEmail(email.to_string()));
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(RegistrationError::InvalidEmail(email.to_string()));
    }
    Ok(())
}

fn validate_profile(profile: &PlatformProfile) -> Result<(), RegistrationError> {
    validate_percent(profile.engagement_rate).map_err(|source| {
        RegistrationError::InvalidProfile {
            platform: profile.platform.clone(),
            source,
        }
    })?;

    let shares: Vec<_> = profile.audience.iter().map(|s| s.percent).collect();
    validate_distribution(&shares).map_err(|source| RegistrationError::InvalidProfile {
        platform: profile.platform.clone(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use partnerflow_core::commands::AudienceShare;
    use rust_decimal::Decimal;

    fn base_command() -> CreateInfluencer {
        CreateInfluencer {
            influencer_id: "inf-1".to_string(),
            name: "Ana".to_string(),
            email: "ana@x.io".to_string(),
            categories: vec!["moda".to_string(), "lifestyle".to_string()],
            platforms: vec![],
            description: None,
            biography: None,
            website: None,
            phone: None,
        }
    }

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn registers_valid_command() {
        let influencer = Influencer::register(&base_command(), Utc::now()).unwrap();
        assert_eq!(influencer.id, "inf-1");
        assert_eq!(influencer.categories.len(), 2);
    }

    #[test]
    fn rejects_missing_fields() {
        let mut cmd = base_command();
        cmd.categories.clear();
        assert_eq!(
            Influencer::register(&cmd, Utc::now()).unwrap_err(),
            RegistrationError::MissingField("categories")
        );

        let mut cmd = base_command();
        cmd.name = "  ".to_string();
        assert_eq!(
            Influencer::register(&cmd, Utc::now()).unwrap_err(),
            RegistrationError::MissingField("name")
        );
    }

    #[test]
    fn rejects_malformed_email() {
        for email in ["not-an-email", "@x.io", "ana@", "ana@host"] {
            let mut cmd = base_command();
            cmd.email = email.to_string();
            assert!(matches!(
                Influencer::register(&cmd, Utc::now()),
                Err(RegistrationError::InvalidEmail(_))
            ));
        }
    }

    #[test]
    fn rejects_bad_audience_distribution() {
        let mut cmd = base_command();
        cmd.platforms.push(PlatformProfile {
            platform: "instagram".to_string(),
            handle: "@ana".to_string(),
            followers: 10_000,
            engagement_rate: d("4.2"),
            audience: vec![
                AudienceShare {
                    segment: "18-24".to_string(),
                    percent: d("60"),
                },
                AudienceShare {
                    segment: "25-34".to_string(),
                    percent: d("20"),
                },
            ],
        });

        assert!(matches!(
            Influencer::register(&cmd, Utc::now()),
            Err(RegistrationError::InvalidProfile { .. })
        ));
    }

    #[test]
    fn accepts_distribution_within_tolerance() {
        let mut cmd = base_command();
        cmd.platforms.push(PlatformProfile {
            platform: "instagram".to_string(),
            handle: "@ana".to_string(),
            followers: 10_000,
            engagement_rate: d("4.2"),
            audience: vec![
                AudienceShare {
                    segment: "18-24".to_string(),
                    percent: d("60.5"),
                },
                AudienceShare {
                    segment: "25-34".to_string(),
                    percent: d("39.0"),
                },
            ],
        });

        assert!(Influencer::register(&cmd, Utc::now()).is_ok());
    }
}
