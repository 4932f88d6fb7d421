//! Expression evaluation against the sandbox binding set.
//!
//! The binding set is closed: `getData`/`setData` (variable store),
//! `getTime`/`time`, `random()`, the math function whitelist, and — for
//! colour expressions — the channel variables `r`, `g`, `b`, `t`, `frame`
//! and the `current` colour object. Anything else is a sandbox violation.

use chrono::{Datelike, Local, Timelike};
use rand::Rng;
use serde_json::{Map, Value};

use super::parser::number;
use super::{BinaryOp, Expr, ExprError, Program, UnaryOp};

/// Per-frame animation bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Channels {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    /// Milliseconds since the animation started.
    pub t: f64,
    pub frame: u64,
}

/// Which flavour of evaluation is running; decides the visible bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Rule guard: read-only, boolean result.
    Guard,
    /// Rule action: `setData` permitted, result ignored.
    Action,
    /// Colour/animation: channel variables visible, numeric result.
    Color,
    /// Pipeline step conditions and custom tool expressions: bare
    /// identifiers resolve against a scope dictionary.
    Scope,
}

/// Evaluation environment for one expression run.
pub struct EvalContext<'a> {
    mode: EvalMode,
    data: Option<&'a mut Map<String, Value>>,
    scope: Option<&'a Map<String, Value>>,
    channels: Option<Channels>,
}

impl<'a> EvalContext<'a> {
    pub fn guard(data: &'a mut Map<String, Value>) -> Self {
        Self {
            mode: EvalMode::Guard,
            data: Some(data),
            scope: None,
            channels: None,
        }
    }

    pub fn action(data: &'a mut Map<String, Value>) -> Self {
        Self {
            mode: EvalMode::Action,
            data: Some(data),
            scope: None,
            channels: None,
        }
    }

    pub fn color(channels: Channels) -> Self {
        Self {
            mode: EvalMode::Color,
            data: None,
            scope: None,
            channels: Some(channels),
        }
    }

    /// Colour evaluation with the variable store visible through `getData`.
    pub fn color_with_data(channels: Channels, data: &'a mut Map<String, Value>) -> Self {
        Self {
            mode: EvalMode::Color,
            data: Some(data),
            scope: None,
            channels: Some(channels),
        }
    }

    pub fn scope(scope: &'a Map<String, Value>) -> Self {
        Self {
            mode: EvalMode::Scope,
            data: None,
            scope: Some(scope),
            channels: None,
        }
    }

    pub fn eval(&mut self, program: &Program) -> Result<Value, ExprError> {
        self.eval_expr(&program.ast)
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => self.resolve_ident(name),
            Expr::Member(base, field) => {
                let base = self.eval_expr(base)?;
                member(&base, field)
            }
            Expr::Index(base, index) => {
                let base = self.eval_expr(base)?;
                let index = self.eval_expr(index)?;
                match (&base, &index) {
                    (Value::Object(map), Value::String(key)) => {
                        Ok(map.get(key).cloned().unwrap_or(Value::Null))
                    }
                    (Value::Array(items), Value::Number(_)) => {
                        let i = as_num(&index)? as usize;
                        Ok(items.get(i).cloned().unwrap_or(Value::Null))
                    }
                    _ => Err(ExprError::Type("invalid index access".into())),
                }
            }
            Expr::Call(name, args) => self.call(name, args),
            Expr::Unary(op, operand) => {
                let value = self.eval_expr(operand)?;
                match op {
                    UnaryOp::Neg => Ok(number(-as_num(&value)?)),
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                }
            }
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_expr(item)?);
                }
                Ok(Value::Array(out))
            }
            Expr::Object(fields) => {
                let mut out = Map::new();
                for (key, value) in fields {
                    out.insert(key.clone(), self.eval_expr(value)?);
                }
                Ok(Value::Object(out))
            }
        }
    }

    fn resolve_ident(&mut self, name: &str) -> Result<Value, ExprError> {
        match name {
            "PI" => return Ok(number(std::f64::consts::PI)),
            "E" => return Ok(number(std::f64::consts::E)),
            "time" => return Ok(time_snapshot()),
            _ => {}
        }

        if let Some(channels) = self.channels {
            match name {
                "r" => return Ok(number(channels.r)),
                "g" => return Ok(number(channels.g)),
                "b" => return Ok(number(channels.b)),
                "t" => return Ok(number(channels.t)),
                "frame" => return Ok(number(channels.frame as f64)),
                "current" => {
                    let mut current = Map::new();
                    current.insert("r".into(), number(channels.r));
                    current.insert("g".into(), number(channels.g));
                    current.insert("b".into(), number(channels.b));
                    return Ok(Value::Object(current));
                }
                _ => {}
            }
        }

        if self.mode == EvalMode::Scope {
            if let Some(scope) = self.scope {
                if let Some(value) = scope.get(name) {
                    return Ok(value.clone());
                }
            }
        }

        Err(ExprError::Violation(name.to_string()))
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value, ExprError> {
        // Data access first; everything else is pure math.
        match name {
            "getData" => {
                let key = self.string_arg(name, args, 0)?;
                if let Some(scope) = self.scope {
                    return Ok(scope.get(&key).cloned().unwrap_or(Value::Null));
                }
                let data = self
                    .data
                    .as_deref()
                    .ok_or_else(|| ExprError::Violation("getData".into()))?;
                return Ok(data.get(&key).cloned().unwrap_or(Value::Null));
            }
            "setData" => {
                if self.mode != EvalMode::Action {
                    return Err(ExprError::Violation("setData".into()));
                }
                let key = self.string_arg(name, args, 0)?;
                let value = self.arg(name, args, 1)?;
                let data = self
                    .data
                    .as_deref_mut()
                    .ok_or_else(|| ExprError::Violation("setData".into()))?;
                if value.is_null() {
                    // setData(k, null) clears the variable, mirroring the
                    // counter pattern's final reset.
                    data.insert(key, Value::Null);
                } else {
                    data.insert(key, value);
                }
                return Ok(Value::Null);
            }
            "getTime" => return Ok(time_snapshot()),
            "random" => {
                let n: i64 = rand::thread_rng().gen_range(0..=255);
                return Ok(Value::from(n));
            }
            _ => {}
        }

        let numeric =
            |ctx: &mut Self, i: usize| -> Result<f64, ExprError> { as_num(&ctx.arg(name, args, i)?) };

        let result = match name {
            "sin" => numeric(self, 0)?.sin(),
            "cos" => numeric(self, 0)?.cos(),
            "tan" => numeric(self, 0)?.tan(),
            "abs" => numeric(self, 0)?.abs(),
            "sqrt" => numeric(self, 0)?.sqrt(),
            "floor" => numeric(self, 0)?.floor(),
            "ceil" => numeric(self, 0)?.ceil(),
            "round" => numeric(self, 0)?.round(),
            "pow" => numeric(self, 0)?.powf(numeric(self, 1)?),
            "min" | "max" => {
                if args.is_empty() {
                    return Err(ExprError::Type(format!("{name}() needs arguments")));
                }
                let mut best = numeric(self, 0)?;
                for i in 1..args.len() {
                    let v = numeric(self, i)?;
                    best = if name == "min" { best.min(v) } else { best.max(v) };
                }
                best
            }
            _ => return Err(ExprError::Violation(name.to_string())),
        };
        Ok(number(result))
    }

    fn arg(&mut self, name: &str, args: &[Expr], i: usize) -> Result<Value, ExprError> {
        let expr = args
            .get(i)
            .ok_or_else(|| ExprError::Type(format!("{name}() missing argument {}", i + 1)))?
            .clone();
        self.eval_expr(&expr)
    }

    fn string_arg(&mut self, name: &str, args: &[Expr], i: usize) -> Result<String, ExprError> {
        match self.arg(name, args, i)? {
            Value::String(s) => Ok(s),
            other => Err(ExprError::Type(format!(
                "{name}() expects a string key, got {other}"
            ))),
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value, ExprError> {
        // Short-circuit booleans before evaluating the right side.
        match op {
            BinaryOp::And => {
                let left = self.eval_expr(lhs)?;
                if !truthy(&left) {
                    return Ok(Value::Bool(false));
                }
                let right = self.eval_expr(rhs)?;
                return Ok(Value::Bool(truthy(&right)));
            }
            BinaryOp::Or => {
                let left = self.eval_expr(lhs)?;
                if truthy(&left) {
                    return Ok(Value::Bool(true));
                }
                let right = self.eval_expr(rhs)?;
                return Ok(Value::Bool(truthy(&right)));
            }
            _ => {}
        }

        let left = self.eval_expr(lhs)?;
        let right = self.eval_expr(rhs)?;

        match op {
            BinaryOp::Eq => Ok(Value::Bool(value_eq(&left, &right))),
            BinaryOp::Ne => Ok(Value::Bool(!value_eq(&left, &right))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ord = value_cmp(&left, &right)?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ord.is_lt(),
                    BinaryOp::Le => ord.is_le(),
                    BinaryOp::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }))
            }
            BinaryOp::Add => match (&left, &right) {
                (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
                _ => Ok(number(as_num(&left)? + as_num(&right)?)),
            },
            BinaryOp::Sub => Ok(number(as_num(&left)? - as_num(&right)?)),
            BinaryOp::Mul => Ok(number(as_num(&left)? * as_num(&right)?)),
            BinaryOp::Div => {
                let divisor = as_num(&right)?;
                if divisor == 0.0 {
                    return Err(ExprError::Type("division by zero".into()));
                }
                Ok(number(as_num(&left)? / divisor))
            }
            BinaryOp::Rem => {
                let divisor = as_num(&right)?;
                if divisor == 0.0 {
                    return Err(ExprError::Type("division by zero".into()));
                }
                Ok(number(as_num(&left)? % divisor))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }
}

/// `{hour, minute, second, weekday, timestamp}` for the local clock.
/// Weekday is Monday-based (0..=6).
fn time_snapshot() -> Value {
    let now = Local::now();
    let mut map = Map::new();
    map.insert("hour".into(), Value::from(now.hour()));
    map.insert("minute".into(), Value::from(now.minute()));
    map.insert("second".into(), Value::from(now.second()));
    map.insert(
        "weekday".into(),
        Value::from(now.weekday().num_days_from_monday()),
    );
    map.insert("timestamp".into(), Value::from(now.timestamp()));
    Value::Object(map)
}

fn member(base: &Value, field: &str) -> Result<Value, ExprError> {
    match base {
        Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
        other => Err(ExprError::Type(format!(
            "cannot access field '{field}' on {other}"
        ))),
    }
}

fn as_num(value: &Value) -> Result<f64, ExprError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExprError::Type("non-finite number".into())),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(ExprError::Type(format!("expected a number, got {other}"))),
    }
}

/// Equality with numeric cross-type comparison (4 == 4.0).
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => a == b,
    }
}

/// Ordering for numbers and strings; anything else is a type error, which
/// guards fold to false — `null > 0` never matches.
fn value_cmp(a: &Value, b: &Value) -> Result<std::cmp::Ordering, ExprError> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (as_num(a)?, as_num(b)?);
            x.partial_cmp(&y)
                .ok_or_else(|| ExprError::Type("unordered comparison".into()))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ExprError::Type(format!("cannot order {a} and {b}"))),
    }
}

/// Python-style truthiness: empty containers, empty strings, zero, and null
/// are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// String form used by `{{path}}` interpolation: strings verbatim, scalars
/// via their JSON form, containers as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::compile;
    use super::*;

    fn eval_guard(src: &str, data: &mut Map<String, Value>) -> Result<Value, ExprError> {
        let program = compile(src).unwrap();
        EvalContext::guard(data).eval(&program)
    }

    #[test]
    fn guard_reads_variable_store() {
        let mut data = Map::new();
        data.insert("counter".into(), Value::from(3));

        assert_eq!(
            eval_guard("getData('counter') > 0", &mut data).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_guard("getData('counter') == 3", &mut data).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            eval_guard("getData('missing') == None", &mut data).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn comparing_null_with_number_is_a_type_error() {
        let mut data = Map::new();
        assert!(eval_guard("getData('counter') > 0", &mut data).is_err());
    }

    #[test]
    fn action_writes_through_set_data() {
        let mut data = Map::new();
        let program = compile("setData('counter', 4)").unwrap();
        EvalContext::action(&mut data).eval(&program).unwrap();
        assert_eq!(data.get("counter"), Some(&Value::from(4)));

        let decrement = compile("setData('counter', getData('counter') - 1)").unwrap();
        EvalContext::action(&mut data).eval(&decrement).unwrap();
        assert_eq!(data.get("counter"), Some(&Value::from(3)));
    }

    #[test]
    fn guard_may_not_call_set_data() {
        let mut data = Map::new();
        let program = compile("setData('x', 1)").unwrap();
        let err = EvalContext::guard(&mut data).eval(&program).unwrap_err();
        assert_eq!(err, ExprError::Violation("setData".into()));
        assert!(data.is_empty());
    }

    #[test]
    fn unknown_identifier_is_a_violation() {
        let mut data = Map::new();
        let program = compile("__import__('os')").unwrap();
        assert!(matches!(
            EvalContext::guard(&mut data).eval(&program),
            Err(ExprError::Violation(_))
        ));
        let program = compile("open").unwrap();
        assert!(matches!(
            EvalContext::guard(&mut data).eval(&program),
            Err(ExprError::Violation(_))
        ));
    }

    #[test]
    fn color_bindings_visible_in_color_mode_only() {
        let channels = Channels {
            r: 10.0,
            g: 20.0,
            b: 30.0,
            t: 500.0,
            frame: 7,
        };
        let program = compile("r + g + b + frame").unwrap();
        assert_eq!(
            EvalContext::color(channels).eval(&program).unwrap(),
            Value::from(67)
        );

        let mut data = Map::new();
        assert!(EvalContext::guard(&mut data).eval(&program).is_err());
    }

    #[test]
    fn current_object_mirrors_channels() {
        let channels = Channels {
            r: 1.0,
            g: 2.0,
            b: 3.0,
            ..Default::default()
        };
        let program = compile("current.g").unwrap();
        assert_eq!(
            EvalContext::color(channels).eval(&program).unwrap(),
            Value::from(2)
        );
    }

    #[test]
    fn animation_expression_stays_in_range_after_clamp() {
        let channels = Channels {
            t: 1000.0,
            ..Default::default()
        };
        let program = compile("abs(sin(t/1000)) * 255").unwrap();
        let value = EvalContext::color(channels).eval(&program).unwrap();
        let n = value.as_f64().unwrap();
        assert!((0.0..=255.0).contains(&n));
    }

    #[test]
    fn scope_mode_resolves_bare_identifiers() {
        let mut scope = Map::new();
        scope.insert("dir".into(), Value::String("up".into()));
        let program = compile("dir == 'up'").unwrap();
        assert_eq!(
            EvalContext::scope(&scope).eval(&program).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn object_literal_builds_tool_results() {
        let scope = Map::new();
        let program = compile("{temp: 70, unit: 'F'}").unwrap();
        let value = EvalContext::scope(&scope).eval(&program).unwrap();
        assert_eq!(value, serde_json::json!({"temp": 70, "unit": "F"}));
    }

    #[test]
    fn random_is_within_byte_range() {
        let scope = Map::new();
        let program = compile("random()").unwrap();
        for _ in 0..32 {
            let value = EvalContext::scope(&scope).eval(&program).unwrap();
            let n = value.as_i64().unwrap();
            assert!((0..=255).contains(&n));
        }
    }

    #[test]
    fn division_by_zero_is_an_error_not_a_panic() {
        let scope = Map::new();
        let program = compile("1 / 0").unwrap();
        assert!(EvalContext::scope(&scope).eval(&program).is_err());
    }

    #[test]
    fn time_snapshot_has_expected_fields() {
        let snapshot = time_snapshot();
        let map = snapshot.as_object().unwrap();
        for field in ["hour", "minute", "second", "weekday", "timestamp"] {
            assert!(map.contains_key(field), "missing {field}");
        }
    }

    #[test]
    fn stringify_forms() {
        assert_eq!(stringify(&Value::String("up".into())), "up");
        assert_eq!(stringify(&Value::from(4)), "4");
        assert_eq!(stringify(&serde_json::json!({"a": 1})), r#"{"a":1}"#);
    }
}
