use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of genres a track can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Genre {
    Pop,
    Rock,
    HipHop,
    Rap,
    Jazz,
    Blues,
    Classical,
    Electronic,
    Country,
    Folk,
    Metal,
    Reggae,
    Rnb,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid genre '{0}'")]
pub struct UnknownGenre(pub String);

impl Genre {
    pub const ALL: [Genre; 14] = [
        Genre::Pop,
        Genre::Rock,
        Genre::HipHop,
        Genre::Rap,
        Genre::Jazz,
        Genre::Blues,
        Genre::Classical,
        Genre::Electronic,
        Genre::Country,
        Genre::Folk,
        Genre::Metal,
        Genre::Reggae,
        Genre::Rnb,
        Genre::Other,
    ];

    /// Canonical name, as stored in the database and sent over the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Pop => "POP",
            Genre::Rock => "ROCK",
            Genre::HipHop => "HIP_HOP",
            Genre::Rap => "RAP",
            Genre::Jazz => "JAZZ",
            Genre::Blues => "BLUES",
            Genre::Classical => "CLASSICAL",
            Genre::Electronic => "ELECTRONIC",
            Genre::Country => "COUNTRY",
            Genre::Folk => "FOLK",
            Genre::Metal => "METAL",
            Genre::Reggae => "REGGAE",
            Genre::Rnb => "RNB",
            Genre::Other => "OTHER",
        }
    }

    /// Human-readable list used in validation messages
    pub fn allowed_list() -> String {
        Self::ALL
            .iter()
            .map(Genre::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn invalid_message() -> String {
        format!("Invalid genre. Allowed genres: {}", Self::allowed_list())
    }
}

impl FromStr for Genre {
    type Err = UnknownGenre;

    /// Case-insensitive match against the canonical names. Surrounding
    /// whitespace is not ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == upper)
            .ok_or_else(|| UnknownGenre(s.to_string()))
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
