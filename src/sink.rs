//! LED sink — the rendering collaborator contract.
//!
//! The engine owns *what* the lamp shows; the sink owns *how* it reaches
//! the hardware (PWM/SPI drivers, the animation thread, microphone
//! coupling). The engine never renders frames itself: it hands the sink a
//! static colour, an animation spec whose expressions the sink evaluates
//! per frame through the sandbox, or a voice-reactive descriptor.

use std::sync::Mutex;

use crate::types::VoiceReactive;

/// Per-frame animation description. The sink evaluates the channel
/// expressions with `{r, g, b, t, frame, random}` bound.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationSpec {
    pub r_expr: String,
    pub g_expr: String,
    pub b_expr: String,
    /// Milliseconds per frame.
    pub speed_ms: u64,
}

/// Passive rendering sink notified on every state entry (no coalescing).
pub trait LedSink: Send + Sync {
    fn render_static(&self, r: u8, g: u8, b: u8);

    fn render_animation(&self, spec: AnimationSpec);

    fn render_voice_reactive(&self, base: (u8, u8, u8), descriptor: &VoiceReactive);

    /// Equivalent to rendering (0, 0, 0).
    fn clear(&self);
}

/// Sink that drops everything. Default for headless runs.
#[derive(Debug, Default)]
pub struct NullSink;

impl LedSink for NullSink {
    fn render_static(&self, _r: u8, _g: u8, _b: u8) {}
    fn render_animation(&self, _spec: AnimationSpec) {}
    fn render_voice_reactive(&self, _base: (u8, u8, u8), _descriptor: &VoiceReactive) {}
    fn clear(&self) {}
}

/// Sink that logs renders through tracing, for development without LED
/// hardware attached.
#[derive(Debug, Default)]
pub struct LogSink;

impl LedSink for LogSink {
    fn render_static(&self, r: u8, g: u8, b: u8) {
        tracing::info!("[Sink] rgb({r}, {g}, {b})");
    }

    fn render_animation(&self, spec: AnimationSpec) {
        tracing::info!(
            "[Sink] animation r=\"{}\" g=\"{}\" b=\"{}\" every {}ms",
            spec.r_expr,
            spec.g_expr,
            spec.b_expr,
            spec.speed_ms
        );
    }

    fn render_voice_reactive(&self, base: (u8, u8, u8), descriptor: &VoiceReactive) {
        tracing::info!(
            "[Sink] voice-reactive base=rgb({}, {}, {}) smoothing={}",
            base.0,
            base.1,
            base.2,
            descriptor.smoothing
        );
    }

    fn clear(&self) {
        tracing::info!("[Sink] clear");
    }
}

/// One recorded sink notification.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Static(u8, u8, u8),
    Animation(AnimationSpec),
    VoiceReactive((u8, u8, u8)),
    Clear,
}

/// Recording sink for tests and dry runs: keeps every notification in
/// arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RenderEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().expect("sink lock poisoned").clone()
    }

    pub fn take(&self) -> Vec<RenderEvent> {
        std::mem::take(&mut *self.events.lock().expect("sink lock poisoned"))
    }

    fn push(&self, event: RenderEvent) {
        self.events.lock().expect("sink lock poisoned").push(event);
    }
}

impl LedSink for RecordingSink {
    fn render_static(&self, r: u8, g: u8, b: u8) {
        self.push(RenderEvent::Static(r, g, b));
    }

    fn render_animation(&self, spec: AnimationSpec) {
        self.push(RenderEvent::Animation(spec));
    }

    fn render_voice_reactive(&self, base: (u8, u8, u8), _descriptor: &VoiceReactive) {
        self.push(RenderEvent::VoiceReactive(base));
    }

    fn clear(&self) {
        self.push(RenderEvent::Clear);
    }
}
