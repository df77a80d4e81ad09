//! Mapping descriptors.
//!
//! A descriptor is the short textual reference that ties one Xbox output
//! to one element of a device's raw state:
//!
//! ```text
//! descriptor := prefix? SPACE? kind SPACE index (SPACE direction)?
//! prefix     := 'I' | 'H' | 'IH'        invert / half-axis / both
//! kind       := 'Axis' | 'Slider' | 'Button' | 'POV'
//! direction  := 'Up' | 'Down' | 'Left' | 'Right'    POV only
//! ```
//!
//! `"Axis 0"`, `"I Slider 1"`, `"IH Axis 2"`, `"Button 5"`, `"POV 0 Up"`.
//! The empty string is a valid [`Binding`] meaning "unbound, output
//! neutral".
//!
//! Reading a descriptor against a [`RawInputState`] yields a value in
//! `0..=65535`; modifiers apply half-axis first, then inversion, so the
//! result is monotone in the source value without `I` and anti-monotone
//! with it. Parsing is tolerant of keyword case; formatting is canonical
//! (`IH Axis 2` with single spaces), so parse → format → parse is the
//! identity.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::state::RawInputState;

/// Full-scale source value.
pub const SOURCE_MAX: u16 = u16::MAX;

/// Why a descriptor string failed to parse.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorParseError {
    #[error("unknown source kind `{0}`")]
    UnknownKind(String),
    #[error("missing source index")]
    MissingIndex,
    #[error("bad source index `{0}`")]
    BadIndex(String),
    #[error("POV descriptors need a direction (Up/Down/Left/Right)")]
    MissingDirection,
    #[error("unknown POV direction `{0}`")]
    UnknownDirection(String),
    #[error("direction is only valid on POV descriptors")]
    DirectionOnNonPov,
    #[error("unexpected trailing input `{0}`")]
    Trailing(String),
}

/// Which element of the raw state a descriptor reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Axis,
    Slider,
    Button,
    Pov,
}

impl SourceKind {
    fn keyword(self) -> &'static str {
        match self {
            SourceKind::Axis => "Axis",
            SourceKind::Slider => "Slider",
            SourceKind::Button => "Button",
            SourceKind::Pov => "POV",
        }
    }
}

/// Hat direction referenced by a POV descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PovDirection {
    Up,
    Down,
    Left,
    Right,
}

impl PovDirection {
    fn keyword(self) -> &'static str {
        match self {
            PovDirection::Up => "Up",
            PovDirection::Down => "Down",
            PovDirection::Left => "Left",
            PovDirection::Right => "Right",
        }
    }

    /// Direction angle in centidegrees (up = 0, clockwise).
    fn centidegrees(self) -> i32 {
        match self {
            PovDirection::Up => 0,
            PovDirection::Right => 9_000,
            PovDirection::Down => 18_000,
            PovDirection::Left => 27_000,
        }
    }
}

/// One parsed descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    /// `I` modifier: invert after the half-axis step.
    pub invert: bool,
    /// `H` modifier: keep only the upper half of the travel.
    pub half: bool,
    /// Source element kind.
    pub kind: SourceKind,
    /// Source element index.
    pub index: u8,
    /// Direction, present iff `kind == Pov`.
    pub direction: Option<PovDirection>,
}

impl Descriptor {
    /// Read the source element out of `raw`, before modifiers.
    fn source_value(&self, raw: &RawInputState) -> u16 {
        let index = self.index as usize;
        match self.kind {
            SourceKind::Axis => raw.axis(index),
            SourceKind::Slider => raw.slider(index),
            SourceKind::Button => {
                if raw.button(index) {
                    SOURCE_MAX
                } else {
                    0
                }
            }
            SourceKind::Pov => {
                let hat = raw.hat(index);
                let dir = self.direction.map(PovDirection::centidegrees);
                match (hat, dir) {
                    (h, Some(d)) if h >= 0 => {
                        // Angular distance on the 0..36000 circle; a diagonal
                        // sits exactly 4500 from both neighbours and counts
                        // for each.
                        let diff = (h - d).rem_euclid(36_000);
                        let dist = diff.min(36_000 - diff);
                        if dist <= 4_500 {
                            SOURCE_MAX
                        } else {
                            0
                        }
                    }
                    _ => 0,
                }
            }
        }
    }

    /// Apply the modifier chain to a raw source value.
    ///
    /// Half-axis keeps the upper half of the travel and stretches it back
    /// to full scale; inversion flips the result. Order matters and is
    /// fixed: `H` first, then `I`.
    pub fn modify(&self, value: u16) -> u16 {
        let mut v = value as i32;
        if self.half {
            v = (2 * v - SOURCE_MAX as i32).max(0);
        }
        if self.invert {
            v = SOURCE_MAX as i32 - v;
        }
        v as u16
    }

    /// Read the fully processed value (`source` then [`Descriptor::modify`]).
    #[inline]
    pub fn read(&self, raw: &RawInputState) -> u16 {
        self.modify(self.source_value(raw))
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.invert, self.half) {
            (true, true) => write!(f, "IH ")?,
            (true, false) => write!(f, "I ")?,
            (false, true) => write!(f, "H ")?,
            (false, false) => {}
        }
        write!(f, "{} {}", self.kind.keyword(), self.index)?;
        if let Some(dir) = self.direction {
            write!(f, " {}", dir.keyword())?;
        }
        Ok(())
    }
}

impl FromStr for Descriptor {
    type Err = DescriptorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The prefix may be glued to the kind ("IHAxis 2"), so token
        // splitting alone isn't enough; peel modifiers off the first token
        // before matching the keyword.
        let mut rest = s.trim();

        let (invert, half) = if let Some(r) = strip_prefix_ci(rest, "IH") {
            rest = r;
            (true, true)
        } else if let Some(r) = strip_modifier(rest, 'I') {
            rest = r;
            (true, false)
        } else if let Some(r) = strip_modifier(rest, 'H') {
            rest = r;
            (false, true)
        } else {
            (false, false)
        };
        let rest = rest.trim_start();

        let mut tokens = rest.split_whitespace();
        let kind_token = tokens.next().unwrap_or("");
        let kind = match kind_token.to_ascii_lowercase().as_str() {
            "axis" => SourceKind::Axis,
            "slider" => SourceKind::Slider,
            "button" => SourceKind::Button,
            "pov" => SourceKind::Pov,
            other => return Err(DescriptorParseError::UnknownKind(other.to_string())),
        };

        let index_token = tokens.next().ok_or(DescriptorParseError::MissingIndex)?;
        let index: u8 = index_token
            .parse()
            .map_err(|_| DescriptorParseError::BadIndex(index_token.to_string()))?;

        let direction = match (kind, tokens.next()) {
            (SourceKind::Pov, Some(tok)) => Some(match tok.to_ascii_lowercase().as_str() {
                "up" => PovDirection::Up,
                "down" => PovDirection::Down,
                "left" => PovDirection::Left,
                "right" => PovDirection::Right,
                other => return Err(DescriptorParseError::UnknownDirection(other.to_string())),
            }),
            (SourceKind::Pov, None) => return Err(DescriptorParseError::MissingDirection),
            (_, Some(_)) => return Err(DescriptorParseError::DirectionOnNonPov),
            (_, None) => None,
        };

        if let Some(extra) = tokens.next() {
            return Err(DescriptorParseError::Trailing(extra.to_string()));
        }

        Ok(Descriptor {
            invert,
            half,
            kind,
            index,
            direction,
        })
    }
}

/// Strip a case-insensitive two-letter prefix when it is followed by a
/// space or a kind keyword.
fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        let rest = &s[prefix.len()..];
        if rest.starts_with(|c: char| c.is_whitespace() || c.is_ascii_alphabetic()) {
            return Some(rest);
        }
    }
    None
}

/// Strip a single modifier letter, guarding against eating the first
/// letter of a bare kind keyword (none of which start with I or H).
fn strip_modifier(s: &str, letter: char) -> Option<&str> {
    let first = s.chars().next()?;
    if first.eq_ignore_ascii_case(&letter) {
        Some(&s[first.len_utf8()..])
    } else {
        None
    }
}

/// An optional descriptor: one Xbox output's source, or nothing.
///
/// Serialises as the descriptor text, with the empty string meaning
/// unbound. An unparseable persisted descriptor degrades to unbound at
/// the settings layer rather than failing the whole document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Binding(pub Option<Descriptor>);

impl Binding {
    /// The unbound binding.
    pub const NONE: Binding = Binding(None);

    /// Bind to a plain source with no modifiers.
    pub fn source(kind: SourceKind, index: u8) -> Binding {
        Binding(Some(Descriptor {
            invert: false,
            half: false,
            kind,
            index,
            direction: None,
        }))
    }

    /// Bind to a POV direction.
    pub fn pov(index: u8, direction: PovDirection) -> Binding {
        Binding(Some(Descriptor {
            invert: false,
            half: false,
            kind: SourceKind::Pov,
            index,
            direction: Some(direction),
        }))
    }

    /// Processed value against `raw`; neutral zero when unbound.
    #[inline]
    pub fn read(&self, raw: &RawInputState) -> u16 {
        match &self.0 {
            Some(d) => d.read(raw),
            None => 0,
        }
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(d) => d.fmt(f),
            None => Ok(()),
        }
    }
}

impl FromStr for Binding {
    type Err = DescriptorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Ok(Binding::NONE)
        } else {
            Ok(Binding(Some(s.parse()?)))
        }
    }
}

impl Serialize for Binding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Binding {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}
