use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    AppleMusic,
    YouTube,
    SoundCloud,
    Spotify,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::AppleMusic,
        Provider::YouTube,
        Provider::SoundCloud,
        Provider::Spotify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::AppleMusic => "AppleMusic",
            Provider::YouTube => "YouTube",
            Provider::SoundCloud => "SoundCloud",
            Provider::Spotify => "Spotify",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "applemusic" => Ok(Provider::AppleMusic),
            "youtube" => Ok(Provider::YouTube),
            "soundcloud" => Ok(Provider::SoundCloud),
            "spotify" => Ok(Provider::Spotify),
            _ => Err(CrawlError::Config(format!("unknown provider: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Alive,
    Dead,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Alive => "alive",
            State::Dead => "dead",
        }
    }

    // Anything unrecognised in storage is treated as dead so it is not crawled.
    pub fn from_db(s: &str) -> Self {
        match s {
            "alive" => State::Alive,
            _ => State::Dead,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parses_both_casings() {
        assert_eq!("YouTube".parse::<Provider>().unwrap(), Provider::YouTube);
        assert_eq!("youtube".parse::<Provider>().unwrap(), Provider::YouTube);
        assert_eq!("applemusic".parse::<Provider>().unwrap(), Provider::AppleMusic);
        assert!("Raw".parse::<Provider>().is_err());
    }

    #[test]
    fn test_provider_display_matches_stored_form() {
        for provider in Provider::ALL {
            assert_eq!(provider.to_string().parse::<Provider>().unwrap(), provider);
        }
    }

    #[test]
    fn test_unknown_state_is_dead() {
        assert_eq!(State::from_db("alive"), State::Alive);
        assert_eq!(State::from_db("zombie"), State::Dead);
    }
}
