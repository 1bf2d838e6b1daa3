//! Character profiles and their reaction tables.
//!
//! A profile is loaded once and is immutable afterwards. Its reaction table is total: every
//! `Emotion × Sentiment` pair maps to exactly one [`Reaction`]; partial tables are rejected at
//! load time so lookups can never miss.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::labels::{Emotion, LabelSet, Sentiment};
use crate::{Error, Result};

const JIM_JSON: &str = include_str!("../profiles/jim.json");
const LOUISA_JSON: &str = include_str!("../profiles/louisa.json");

/// What the character does for one `(emotion, sentiment)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    /// Target weight per expression control channel. Channels not listed target 0.
    #[serde(default)]
    pub expression: BTreeMap<String, f32>,

    /// One-shot gesture fired when the emotion changes into this reaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gesture: Option<Gesture>,

    /// Delay before the state decays back to `(Neutral, Neutral)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_ms: Option<u64>,
}

/// A named animation clip played once at `time_scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gesture {
    pub name: String,

    #[serde(default = "default_time_scale")]
    pub time_scale: f32,

    /// Split the clip into concurrently playing sub-clips named `<name>_<part>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<ClipSplit>,
}

/// Sub-clip layout for a composite gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSplit {
    pub parts: Vec<String>,

    /// The part whose completion returns the character to idle.
    pub finisher: String,
}

fn default_time_scale() -> f32 {
    1.0
}

impl Gesture {
    pub fn new(name: impl Into<String>, time_scale: f32) -> Self {
        Self {
            name: name.into(),
            time_scale,
            split: None,
        }
    }

    /// Clip names to start, in order.
    pub fn clips(&self) -> Vec<String> {
        match &self.split {
            Some(split) => split
                .parts
                .iter()
                .map(|part| format!("{}_{part}", self.name))
                .collect(),
            None => vec![self.name.clone()],
        }
    }

    /// The clip whose completion ends the gesture.
    pub fn finisher_clip(&self) -> String {
        match &self.split {
            Some(split) => format!("{}_{}", self.name, split.finisher),
            None => self.name.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::msg("gesture name must not be empty"));
        }
        if !(self.time_scale > 0.0) {
            return Err(Error::msg(format!(
                "gesture '{}' has non-positive time scale {}",
                self.name, self.time_scale
            )));
        }
        if let Some(split) = &self.split {
            if split.parts.is_empty() {
                return Err(Error::msg(format!("gesture '{}' has an empty split", self.name)));
            }
            if !split.parts.contains(&split.finisher) {
                return Err(Error::msg(format!(
                    "gesture '{}' finisher '{}' is not one of its parts",
                    self.name, split.finisher
                )));
            }
        }
        Ok(())
    }
}

/// Total mapping from every `Emotion × Sentiment` pair to a [`Reaction`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionTable {
    // Indexed by `emotion.index() * Sentiment::ALL.len() + sentiment.index()`.
    entries: Vec<Reaction>,
}

type NestedTable = BTreeMap<Emotion, BTreeMap<Sentiment, Reaction>>;

impl ReactionTable {
    /// Build a table from a nested map, failing if any pair is missing.
    pub fn from_nested(nested: NestedTable) -> Result<Self> {
        let mut entries = Vec::with_capacity(Emotion::ALL.len() * Sentiment::ALL.len());
        for emotion in Emotion::ALL {
            let row = nested.get(&emotion);
            for sentiment in Sentiment::ALL {
                let reaction = row
                    .and_then(|row| row.get(&sentiment))
                    .cloned()
                    .ok_or_else(|| {
                        Error::msg(format!(
                            "reaction table is missing an entry for {emotion}/{sentiment}"
                        ))
                    })?;
                for (channel, weight) in &reaction.expression {
                    if !(0.0..=1.0).contains(weight) {
                        return Err(Error::msg(format!(
                            "{emotion}/{sentiment}: expression '{channel}' weight {weight} is outside [0, 1]"
                        )));
                    }
                }
                if let Some(gesture) = &reaction.gesture {
                    gesture.validate()?;
                }
                entries.push(reaction);
            }
        }
        Ok(Self { entries })
    }

    /// Look up the reaction for a pair. Never fails: the table is total.
    pub fn get(&self, emotion: Emotion, sentiment: Sentiment) -> &Reaction {
        &self.entries[emotion.index() * Sentiment::ALL.len() + sentiment.index()]
    }

    /// Every expression channel referenced anywhere in the table.
    pub fn channels(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|r| r.expression.keys().cloned())
            .collect()
    }

    fn to_nested(&self) -> NestedTable {
        let mut nested = NestedTable::new();
        for emotion in Emotion::ALL {
            let row = nested.entry(emotion).or_default();
            for sentiment in Sentiment::ALL {
                row.insert(sentiment, self.get(emotion, sentiment).clone());
            }
        }
        nested
    }
}

impl Serialize for ReactionTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_nested().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReactionTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let nested = NestedTable::deserialize(deserializer)?;
        ReactionTable::from_nested(nested).map_err(serde::de::Error::custom)
    }
}

/// A reactive character: metadata for the voice-chat collaborator plus the reaction rules the
/// engine runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,

    /// Body color for the renderer (e.g. `"#4f63ad"`).
    #[serde(default)]
    pub color: String,

    /// Voice preset for the voice-chat collaborator.
    #[serde(default)]
    pub voice: String,

    /// Persona instructions for the voice-chat collaborator.
    #[serde(default)]
    pub persona: String,

    /// Expression control channels exposed by the rig. Empty means "every channel the table
    /// mentions".
    #[serde(default)]
    pub channels: Vec<String>,

    /// Channel that receives the speaking floor while the user talks.
    #[serde(default)]
    pub speaking_channel: Option<String>,

    /// Gesture played once when a session starts.
    #[serde(default)]
    pub greeting: Option<Gesture>,

    pub reactions: ReactionTable,
}

impl CharacterProfile {
    /// Load a profile from JSON.
    pub fn from_reader<R: Read>(r: R) -> Result<Self> {
        let profile: CharacterProfile = serde_json::from_reader(r)?;
        profile.validated()
    }

    /// Load a profile from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            Error::msg(format!("failed to open profile '{}': {err}", path.display()))
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// One of the profiles shipped with the crate (`"jim"` or `"louisa"`).
    pub fn builtin(name: &str) -> Result<Self> {
        let json = match name.trim().to_ascii_lowercase().as_str() {
            "jim" => JIM_JSON,
            "louisa" => LOUISA_JSON,
            other => {
                return Err(Error::msg(format!(
                    "unknown built-in profile '{other}' (expected 'jim' or 'louisa')"
                )));
            }
        };
        Self::from_reader(json.as_bytes())
    }

    pub fn jim() -> Result<Self> {
        Self::builtin("jim")
    }

    pub fn louisa() -> Result<Self> {
        Self::builtin("louisa")
    }

    /// The rig's expression channels, falling back to every channel the table mentions.
    pub fn expression_channels(&self) -> Vec<String> {
        if !self.channels.is_empty() {
            return self.channels.clone();
        }
        let mut channels = self.reactions.channels();
        if let Some(ch) = &self.speaking_channel {
            channels.insert(ch.clone());
        }
        channels.into_iter().collect()
    }

    fn validated(self) -> Result<Self> {
        if let Some(greeting) = &self.greeting {
            greeting.validate()?;
        }
        if let Some(ch) = &self.speaking_channel {
            if !self.channels.is_empty() && !self.channels.contains(ch) {
                return Err(Error::msg(format!(
                    "speaking channel '{ch}' is not one of the profile's channels"
                )));
            }
        }
        Ok(self)
    }
}
