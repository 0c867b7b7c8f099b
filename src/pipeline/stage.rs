//! Canonical pipeline stages and the legacy alias table.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Legacy stage names still emitted by older backend records, with the
/// canonical stage each one maps to.
const LEGACY_ALIASES: [(&str, Stage); 6] = [
    ("lead", Stage::InitialReview),
    ("underwriting", Stage::ActiveReview),
    ("loi_submitted", Stage::UnderContract),
    ("due_diligence", Stage::UnderContract),
    ("closed_won", Stage::Closed),
    ("closed_lost", Stage::Dead),
];

/// A canonical pipeline stage.
///
/// The declaration order is the board's column order, so `Ord` follows the
/// pipeline from `Dead` through `Realized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Stage {
    /// Abandoned. Absorbing.
    #[cfg_attr(feature = "serde", serde(alias = "closed_lost"))]
    Dead,
    /// First look at a new opportunity.
    #[cfg_attr(feature = "serde", serde(alias = "lead"))]
    InitialReview,
    /// Underwriting in progress.
    #[cfg_attr(feature = "serde", serde(alias = "underwriting"))]
    ActiveReview,
    /// LOI accepted or contract signed.
    #[cfg_attr(
        feature = "serde",
        serde(alias = "loi_submitted", alias = "due_diligence")
    )]
    UnderContract,
    /// Acquisition completed. Absorbing.
    #[cfg_attr(feature = "serde", serde(alias = "closed_won"))]
    Closed,
    /// Investment exited.
    Realized,
}

impl Stage {
    /// Number of canonical stages.
    pub const COUNT: usize = 6;

    /// Every stage in column order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Dead,
        Self::InitialReview,
        Self::ActiveReview,
        Self::UnderContract,
        Self::Closed,
        Self::Realized,
    ];

    /// Position of the stage in [`Stage::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Dead => 0,
            Self::InitialReview => 1,
            Self::ActiveReview => 2,
            Self::UnderContract => 3,
            Self::Closed => 4,
            Self::Realized => 5,
        }
    }

    /// The wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dead => "dead",
            Self::InitialReview => "initial_review",
            Self::ActiveReview => "active_review",
            Self::UnderContract => "under_contract",
            Self::Closed => "closed",
            Self::Realized => "realized",
        }
    }

    /// Returns `true` if no outbound transition exists from this stage.
    #[must_use]
    pub const fn is_absorbing(self) -> bool {
        matches!(self, Self::Dead | Self::Closed)
    }

    /// Returns `true` for stages where work is still happening.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::InitialReview | Self::ActiveReview | Self::UnderContract
        )
    }

    /// Parses a stage name as delivered by the backend.
    ///
    /// Accepts canonical names and legacy aliases, case-insensitively and
    /// with surrounding whitespace ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for unknown names.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dealboard::pipeline::Stage;
    ///
    /// assert_eq!(Stage::parse("loi_submitted").unwrap(), Stage::UnderContract);
    /// assert_eq!(Stage::parse(" Active_Review ").unwrap(), Stage::ActiveReview);
    /// assert!(Stage::parse("pending").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .or_else(|| Self::from_legacy(&normalized))
            .ok_or_else(|| ValidationError::new("stage", format!("unknown stage {raw:?}")))
    }

    /// Maps a legacy stage name onto its canonical stage.
    #[must_use]
    pub fn from_legacy(name: &str) -> Option<Self> {
        LEGACY_ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, stage)| *stage)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Dead => "Dead",
            Self::InitialReview => "Initial Review",
            Self::ActiveReview => "Active Review",
            Self::UnderContract => "Under Contract",
            Self::Closed => "Closed",
            Self::Realized => "Realized",
        };
        write!(formatter, "{label}")
    }
}

impl FromStr for Stage {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}
