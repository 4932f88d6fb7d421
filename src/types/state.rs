//! Light state descriptors.
//!
//! A state names how the lamp should look: a static colour, an
//! expression-driven animation, or a voice-reactive colour. States with a
//! `duration_ms` chain into their `then` state when the duration elapses.

use serde::{Deserialize, Serialize};

/// A colour channel: either a fixed value in [0,255] or an expression
/// evaluated by the sandbox (per frame for animated states).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    Fixed(i64),
    Expr(String),
}

impl ChannelValue {
    /// Fixed value clamped into [0,255], or None for expressions.
    pub fn as_fixed(&self) -> Option<u8> {
        match self {
            ChannelValue::Fixed(v) => Some((*v).clamp(0, 255) as u8),
            ChannelValue::Expr(_) => None,
        }
    }

    pub fn is_expr(&self) -> bool {
        matches!(self, ChannelValue::Expr(_))
    }
}

/// Voice-reactive rendering descriptor: couples microphone amplitude to
/// brightness. The microphone itself is the sink's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceReactive {
    #[serde(default)]
    pub enabled: bool,
    /// Colour override; falls back to the state's base colour when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<[u8; 3]>,
    /// Exponential smoothing factor in [0,1].
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    #[serde(default)]
    pub min_amp: f64,
    #[serde(default = "default_max_amp")]
    pub max_amp: f64,
}

fn default_smoothing() -> f64 {
    0.3
}

fn default_max_amp() -> f64 {
    1.0
}

/// A named rendering descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<ChannelValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub g: Option<ChannelValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b: Option<ChannelValue>,
    /// Milliseconds per animation frame. None means static.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u64>,
    /// Auto-advance to `then` after this many milliseconds. None means
    /// indefinite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Destination state once `duration_ms` elapses. Required iff
    /// `duration_ms` is set; existence is checked lazily at expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_reactive: Option<VoiceReactive>,
    #[serde(default)]
    pub description: String,
}

impl LightState {
    /// A static colour state with a generated description.
    pub fn solid(name: &str, r: i64, g: i64, b: i64) -> Self {
        Self {
            name: name.to_string(),
            r: Some(ChannelValue::Fixed(r)),
            g: Some(ChannelValue::Fixed(g)),
            b: Some(ChannelValue::Fixed(b)),
            speed: None,
            duration_ms: None,
            then: None,
            voice_reactive: None,
            description: format!("Static color state with r={r}, g={g}, b={b}"),
        }
    }

    /// True when any channel is an expression or an animation speed is set.
    pub fn is_animated(&self) -> bool {
        self.speed.is_some()
            || [&self.r, &self.g, &self.b]
                .iter()
                .any(|c| c.as_ref().is_some_and(|c| c.is_expr()))
    }

    /// The canonical `off` state: all channels dark.
    pub fn canonical_off() -> Self {
        let mut s = Self::solid("off", 0, 0, 0);
        s.description = "turn light off".to_string();
        s
    }

    /// The canonical `on` state: warm white.
    pub fn canonical_on() -> Self {
        let mut s = Self::solid("on", 255, 255, 200);
        s.description = "turn light on (warm white)".to_string();
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_value_parses_number_or_expression() {
        let fixed: ChannelValue = serde_json::from_str("200").unwrap();
        assert_eq!(fixed.as_fixed(), Some(200));

        let expr: ChannelValue = serde_json::from_str("\"abs(sin(t/1000)) * 255\"").unwrap();
        assert!(expr.is_expr());
        assert_eq!(expr.as_fixed(), None);
    }

    #[test]
    fn fixed_channels_clamp_to_byte_range() {
        assert_eq!(ChannelValue::Fixed(300).as_fixed(), Some(255));
        assert_eq!(ChannelValue::Fixed(-5).as_fixed(), Some(0));
    }

    #[test]
    fn animated_when_speed_or_expression_present() {
        let mut state = LightState::solid("red", 255, 0, 0);
        assert!(!state.is_animated());

        state.speed = Some(50);
        assert!(state.is_animated());

        state.speed = None;
        state.r = Some(ChannelValue::Expr("random()".into()));
        assert!(state.is_animated());
    }
}
