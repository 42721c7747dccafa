//! Audio filter selection.
//!
//! A [`FilterSpec`] is parsed once at the request boundary and translated
//! deterministically into a transcoder filter-graph string. Parsing never
//! fails: an unrecognized filter name means "no filter", so a bad `filter=`
//! query parameter degrades to a plain stream instead of an error.

/// Bounds applied to the factor of a dynamic `pitch:`/`speed:` filter.
pub const FACTOR_RANGE: (f64, f64) = (0.5, 2.0);

/// A validated audio effect selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterSpec {
    /// Pass the audio through untouched.
    None,
    /// One of the fixed effect presets.
    Preset(FilterPreset),
    /// Pitch shift by a factor, clamped to [`FACTOR_RANGE`].
    Pitch(f64),
    /// Tempo change by a factor, clamped to [`FACTOR_RANGE`].
    Speed(f64),
}

/// The fixed effect presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPreset {
    /// Boosted low end.
    Bassboost,
    /// Sped-up, higher-pitched playback.
    Nightcore,
    /// Slowed, lower-pitched playback.
    Vaporwave,
    /// Rotating stereo field.
    EightD,
    /// Vocal cancellation.
    Karaoke,
}

impl FilterSpec {
    /// Parses user input into a filter selection.
    ///
    /// Accepts a preset name or a `pitch:<factor>` / `speed:<factor>` pair.
    /// Anything else, including an unparsable or non-finite factor, is
    /// treated as [`FilterSpec::None`].
    pub fn parse(input: &str) -> Self {
        let input = input.trim().to_lowercase();
        match input.as_str() {
            "" | "none" => Self::None,
            "bassboost" => Self::Preset(FilterPreset::Bassboost),
            "nightcore" => Self::Preset(FilterPreset::Nightcore),
            "vaporwave" => Self::Preset(FilterPreset::Vaporwave),
            "8d" => Self::Preset(FilterPreset::EightD),
            "karaoke" => Self::Preset(FilterPreset::Karaoke),
            other => match other.split_once(':') {
                Some(("pitch", factor)) => parse_factor(factor).map_or(Self::None, Self::Pitch),
                Some(("speed", factor)) => parse_factor(factor).map_or(Self::None, Self::Speed),
                _ => Self::None,
            },
        }
    }

    /// Whether this selection leaves the audio untouched.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The transcoder filter-graph argument for this selection, or `None`
    /// when no `-af` argument should be passed at all.
    pub fn filter_graph(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Preset(preset) => Some(preset.filter_graph().to_owned()),
            Self::Pitch(factor) => Some(format!("asetrate=48000*{factor},aresample=48000")),
            Self::Speed(factor) => Some(format!("atempo={factor}")),
        }
    }
}

impl FilterPreset {
    fn filter_graph(&self) -> &'static str {
        match self {
            Self::Bassboost => "bass=g=15:f=110:w=0.3",
            Self::Nightcore => "aresample=48000,asetrate=48000*1.25",
            Self::Vaporwave => "aresample=48000,asetrate=48000*0.8",
            Self::EightD => "apulsator=hz=0.09",
            Self::Karaoke => "pan=stereo|c0=c0-c1|c1=c1-c0",
        }
    }
}

fn parse_factor(raw: &str) -> Option<f64> {
    let factor: f64 = raw.trim().parse().ok()?;
    if !factor.is_finite() {
        return None;
    }
    Some(factor.clamp(FACTOR_RANGE.0, FACTOR_RANGE.1))
}
