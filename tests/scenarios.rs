//! End-to-end engine scenarios.
//!
//! Timer scenarios run on tokio's paused clock, so wall-clock waits are
//! virtual and deterministic.

use std::sync::Arc;

use serde_json::json;

use lumen::{
    events, DataSource, Engine, LightState, RecordingSink, RenderEvent, Rule, RuleCriteria,
    TriggerConfig,
};

fn engine_with_sink() -> (Engine, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let engine = Engine::builder().sink(sink.clone()).build();
    (engine, sink)
}

async fn add_solid(engine: &Engine, name: &str, r: i64, g: i64, b: i64) {
    engine
        .create_state(LightState::solid(name, r, g, b))
        .await
        .unwrap();
}

// ----------------------------------------------------------------------
// S1 — Toggle
// ----------------------------------------------------------------------

#[tokio::test]
async fn s1_default_toggle() {
    let (engine, _sink) = engine_with_sink();
    assert_eq!(engine.current_state().await, "off");

    let mut trace = Vec::new();
    for _ in 0..3 {
        assert!(engine.on_event(events::BUTTON_CLICK).await);
        trace.push(engine.current_state().await);
    }
    assert_eq!(trace, ["on", "off", "on"]);
}

// ----------------------------------------------------------------------
// S2 — Counter pattern
// ----------------------------------------------------------------------

#[tokio::test]
async fn s2_counter_pattern() {
    let (engine, _sink) = engine_with_sink();
    add_solid(&engine, "random_color", 128, 128, 128).await;
    engine
        .delete_rules(&RuleCriteria {
            all: true,
            ..Default::default()
        })
        .await;

    engine
        .append_rules(vec![
            Rule::new("*", events::BUTTON_CLICK, "random_color")
                .with_condition("getData('counter') == null")
                .with_action("setData('counter', 4 - 1)"),
            Rule::new("random_color", events::BUTTON_CLICK, "random_color")
                .with_condition("getData('counter') > 0")
                .with_action("setData('counter', getData('counter') - 1)"),
            Rule::new("random_color", events::BUTTON_CLICK, "off")
                .with_condition("getData('counter') == 0")
                .with_action("setData('counter', null)"),
        ])
        .await
        .unwrap();

    let mut trace = Vec::new();
    for _ in 0..5 {
        assert!(engine.on_event(events::BUTTON_CLICK).await);
        trace.push(engine.current_state().await);
    }

    assert_eq!(
        trace,
        [
            "random_color",
            "random_color",
            "random_color",
            "random_color",
            "off"
        ]
    );
    assert_eq!(engine.variable("counter").await, Some(serde_json::Value::Null));
}

// ----------------------------------------------------------------------
// S3 — Priority safety rule
// ----------------------------------------------------------------------

#[tokio::test]
async fn s3_priority_safety_rule() {
    let (engine, _sink) = engine_with_sink();
    add_solid(&engine, "active", 0, 255, 0).await;

    engine
        .append_rules(vec![
            Rule::new("*", events::BUTTON_HOLD, "off").with_priority(100),
            Rule::new("off", events::BUTTON_CLICK, "active"),
        ])
        .await
        .unwrap();

    engine.set_state("active").await.unwrap();
    assert!(engine.on_event(events::BUTTON_HOLD).await);
    assert_eq!(engine.current_state().await, "off");
}

// ----------------------------------------------------------------------
// S4 — Timer auto-cleanup
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn s4_timer_auto_cleanup() {
    let (engine, sink) = engine_with_sink();
    add_solid(&engine, "red", 255, 0, 0).await;
    let rules_before = engine.rules().await.len();

    let mut rule = Rule::new("*", events::TIMER, "red");
    rule.trigger_config = Some(TriggerConfig {
        delay_ms: Some(50),
        auto_cleanup: Some(true),
        ..Default::default()
    });
    engine.append_rules(vec![rule]).await.unwrap();

    sink.take();
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;

    assert_eq!(engine.current_state().await, "red");
    assert_eq!(sink.take(), vec![RenderEvent::Static(255, 0, 0)]);
    assert_eq!(engine.rules().await.len(), rules_before, "rule auto-removed");

    // Well past the delay: no further fires.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert!(sink.take().is_empty());
}

// ----------------------------------------------------------------------
// S5 — Interval + data source
// ----------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn s5_data_source_polls_stores_and_fires() {
    let (engine, sink) = engine_with_sink();
    add_solid(&engine, "warm", 255, 140, 0).await;

    engine
        .define_tool(lumen::CustomTool::new(
            "weather_probe",
            "{temp: 70}",
            "canned weather",
        ))
        .await
        .unwrap();

    engine
        .create_data_source(
            DataSource::new("weather", 100, "weather_probe", "weather_updated")
                .with_mapping("temperature", "result.temp"),
        )
        .await
        .unwrap();

    engine
        .append_rules(vec![Rule::new("*", "weather_updated", "warm")])
        .await
        .unwrap();

    sink.take();
    tokio::time::sleep(std::time::Duration::from_millis(350)).await;

    assert_eq!(engine.current_state().await, "warm");
    let warm_entries = sink
        .take()
        .into_iter()
        .filter(|e| *e == RenderEvent::Static(255, 140, 0))
        .count();
    assert!(warm_entries >= 3, "expected >= 3 warm entries, got {warm_entries}");
    assert_eq!(engine.variable("temperature").await, Some(json!(70)));
}

// ----------------------------------------------------------------------
// S6 — Pipeline with conditional map
// ----------------------------------------------------------------------

#[tokio::test]
async fn s6_pipeline_setvar_then_mapped_setstate() {
    let (engine, _sink) = engine_with_sink();
    add_solid(&engine, "green", 0, 255, 0).await;
    add_solid(&engine, "red", 255, 0, 0).await;

    let pipeline: lumen::Pipeline = serde_json::from_value(json!({
        "name": "direction",
        "description": "route by direction variable",
        "steps": [
            {"do": "setVar", "key": "dir", "value": "up"},
            {"do": "setState", "from": "dir", "map": {"up": "green", "down": "red"}},
        ],
    }))
    .unwrap();
    engine.define_pipeline(pipeline).await;

    let result = engine.run_pipeline("direction").await.unwrap();

    assert!(result.success);
    assert_eq!(engine.current_state().await, "green");
    assert_eq!(result.scope.get("dir"), Some(&json!("up")));
}

// ----------------------------------------------------------------------
// Universal invariants
// ----------------------------------------------------------------------

#[tokio::test]
async fn deterministic_modulo_io() {
    async fn run_sequence() -> Vec<String> {
        let (engine, _sink) = engine_with_sink();
        add_solid(&engine, "dim", 30, 30, 30).await;
        engine
            .append_rules(vec![
                Rule::new("on", events::BUTTON_DOUBLE_CLICK, "dim"),
                Rule::new("dim", events::BUTTON_CLICK, "off"),
            ])
            .await
            .unwrap();

        let mut trace = Vec::new();
        for event in [
            events::BUTTON_CLICK,
            events::BUTTON_DOUBLE_CLICK,
            events::BUTTON_CLICK,
            events::BUTTON_CLICK,
            events::BUTTON_HOLD,
        ] {
            engine.on_event(event).await;
            trace.push(engine.current_state().await);
        }
        trace
    }

    assert_eq!(run_sequence().await, run_sequence().await);
}

#[tokio::test]
async fn upsert_keeps_identity_triples_unique() {
    let (engine, _sink) = engine_with_sink();
    add_solid(&engine, "blue", 0, 0, 255).await;

    engine
        .append_rules(vec![Rule::new("off", events::BUTTON_CLICK, "blue")])
        .await
        .unwrap();

    let rules = engine.rules().await;
    let same: Vec<_> = rules
        .iter()
        .filter(|r| r.from == "off" && r.on == events::BUTTON_CLICK && r.condition.is_none())
        .collect();
    assert_eq!(same.len(), 1);
    assert_eq!(same[0].to, "blue", "replacement won");
}

#[tokio::test(start_paused = true)]
async fn duration_state_advances_and_cancellation_works() {
    let (engine, _sink) = engine_with_sink();
    let mut flash = LightState::solid("flash", 255, 255, 255);
    flash.duration_ms = Some(80);
    flash.then = Some("off".into());
    engine.create_state(flash).await.unwrap();

    // Uncontested: advances to `then` within duration + scheduler grain.
    engine.set_state("flash").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(engine.current_state().await, "off");

    // Competing transition cancels the pending duration timer.
    engine.set_state("flash").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(40)).await;
    engine.set_state("on").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(engine.current_state().await, "on");
}

#[tokio::test(start_paused = true)]
async fn removing_a_rule_cancels_its_timer() {
    let (engine, sink) = engine_with_sink();
    add_solid(&engine, "red", 255, 0, 0).await;

    let mut rule = Rule::new("*", events::TIMER, "red");
    rule.trigger_config = Some(TriggerConfig {
        delay_ms: Some(50),
        auto_cleanup: Some(false),
        ..Default::default()
    });
    engine.append_rules(vec![rule]).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let deleted = engine
        .delete_rules(&RuleCriteria {
            on: Some(events::TIMER.into()),
            ..Default::default()
        })
        .await;
    assert_eq!(deleted, 1);

    sink.take();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(engine.current_state().await, "off", "no post-cancel firing");
    assert!(sink.take().is_empty());
}

#[tokio::test(start_paused = true)]
async fn upsert_cancels_the_predecessors_pending_timer() {
    let (engine, _sink) = engine_with_sink();
    add_solid(&engine, "red", 255, 0, 0).await;

    let timer_rule = |delay_ms: u64| {
        let mut rule = Rule::new("*", events::TIMER, "red");
        rule.trigger_config = Some(TriggerConfig {
            delay_ms: Some(delay_ms),
            auto_cleanup: Some(false),
            ..Default::default()
        });
        rule
    };

    engine.append_rules(vec![timer_rule(50)]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Same (from, on, condition): replaces the rule, cancels the 50ms timer.
    engine.append_rules(vec![timer_rule(200)]).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    assert_eq!(engine.current_state().await, "off", "old timer must not fire");

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(engine.current_state().await, "red", "replacement fires on its own delay");
}

#[tokio::test(start_paused = true)]
async fn interval_rule_repeats_until_removed() {
    let (engine, sink) = engine_with_sink();
    add_solid(&engine, "tick", 10, 10, 10).await;

    let mut rule = Rule::new("*", events::INTERVAL, "tick");
    rule.trigger_config = Some(TriggerConfig {
        delay_ms: Some(100),
        repeat: Some(true),
        ..Default::default()
    });
    engine.append_rules(vec![rule]).await.unwrap();

    sink.take();
    tokio::time::sleep(std::time::Duration::from_millis(350)).await;
    let ticks = sink
        .take()
        .into_iter()
        .filter(|e| *e == RenderEvent::Static(10, 10, 10))
        .count();
    assert!(ticks >= 3, "expected >= 3 interval fires, got {ticks}");

    engine
        .delete_rules(&RuleCriteria {
            all: true,
            ..Default::default()
        })
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(sink.take().is_empty(), "interval stops with its rule");
}

#[tokio::test]
async fn wildcard_prefix_rules_match_family_members_only() {
    let (engine, _sink) = engine_with_sink();
    add_solid(&engine, "party", 200, 0, 200).await;
    add_solid(&engine, "party/strobe", 255, 0, 255).await;

    engine
        .append_rules(vec![Rule::new("party/*", events::BUTTON_CLICK, "off").with_priority(50)])
        .await
        .unwrap();

    engine.set_state("party/strobe").await.unwrap();
    assert!(engine.on_event(events::BUTTON_CLICK).await);
    assert_eq!(engine.current_state().await, "off");

    // The bare prefix is not part of the family; default toggle rules were
    // left in place, none match `party`, so the event reports no rule.
    engine.set_state("party").await.unwrap();
    assert!(!engine.on_event(events::BUTTON_CLICK).await);
    assert_eq!(engine.current_state().await, "party");
}

#[tokio::test]
async fn unknown_transition_target_keeps_current_state() {
    let (engine, _sink) = engine_with_sink();
    engine
        .append_rules(vec![
            Rule::new("off", events::BUTTON_DOUBLE_CLICK, "nonexistent").with_priority(5),
        ])
        .await
        .unwrap();

    assert!(engine.on_event(events::BUTTON_DOUBLE_CLICK).await);
    assert_eq!(engine.current_state().await, "off");
}

#[tokio::test]
async fn disabled_rules_never_fire() {
    let (engine, _sink) = engine_with_sink();
    add_solid(&engine, "blue", 0, 0, 255).await;

    let mut rule = Rule::new("off", events::BUTTON_HOLD, "blue");
    rule.enabled = false;
    engine.append_rules(vec![rule]).await.unwrap();

    assert!(!engine.on_event(events::BUTTON_HOLD).await);
    assert_eq!(engine.current_state().await, "off");
}

#[tokio::test]
async fn voice_reactive_states_pass_their_descriptor_to_the_sink() {
    let (engine, sink) = engine_with_sink();
    let mut state = LightState::solid("vu", 0, 0, 255);
    state.voice_reactive = Some(lumen::VoiceReactive {
        enabled: true,
        color: Some([255, 0, 0]),
        smoothing: 0.5,
        min_amp: 0.0,
        max_amp: 1.0,
    });
    engine.create_state(state).await.unwrap();

    engine.set_state("vu").await.unwrap();
    assert_eq!(
        sink.take(),
        vec![RenderEvent::VoiceReactive((255, 0, 0))],
        "colour override wins over the base colour"
    );
}

#[tokio::test]
async fn animated_states_hand_expressions_to_the_sink() {
    let (engine, sink) = engine_with_sink();
    let mut state = LightState::solid("pulse", 0, 0, 64);
    state.r = Some(lumen::ChannelValue::Expr("abs(sin(t/1000)) * 255".into()));
    state.speed = Some(40);
    engine.create_state(state).await.unwrap();

    engine.set_state("pulse").await.unwrap();
    match sink.take().as_slice() {
        [RenderEvent::Animation(spec)] => {
            assert_eq!(spec.r_expr, "abs(sin(t/1000)) * 255");
            assert_eq!(spec.g_expr, "0");
            assert_eq!(spec.speed_ms, 40);
        }
        other => panic!("expected one animation render, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_timers_and_clears_the_sink() {
    let (engine, sink) = engine_with_sink();
    add_solid(&engine, "red", 255, 0, 0).await;

    let mut rule = Rule::new("*", events::TIMER, "red");
    rule.trigger_config = Some(TriggerConfig {
        delay_ms: Some(50),
        ..Default::default()
    });
    engine.append_rules(vec![rule]).await.unwrap();

    engine.shutdown().await;
    assert_eq!(engine.current_state().await, "off");
    assert!(sink.events().contains(&RenderEvent::Clear));

    sink.take();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(sink.take().is_empty(), "no timer survives shutdown");
}
