//! Array constructors and reductions.

use super::numeric::{Numeric, integer, invalid, number, numeric, scalar};
use crate::core::NodeValue;
use crate::core::error::ExecutionError;
use crate::core::node::{ExecContext, NodeLogic, Properties, ResolvedInputs};
use crate::core::port::{InputSpec, OutputSpec, PortSchema};
use crate::core::token::TokenMap;
use crate::core::traits::Trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn items<'a>(port: &str, value: &'a NodeValue) -> Result<&'a Vec<NodeValue>, ExecutionError> {
    value
        .as_array()
        .ok_or_else(|| invalid(port, format!("{} is not an array", value)))
}

fn count(port: &str, value: &NodeValue) -> Result<usize, ExecutionError> {
    let n = integer(port, value)?;
    usize::try_from(n).map_err(|_| invalid(port, format!("{} is negative", n)))
}

fn integral_elements(traits: &Trait) -> bool {
    matches!(traits, Trait::Array(inner) if **inner == Trait::INTEGER)
}

/// An array of `size` copies of `fill_value`.
#[derive(Clone)]
pub struct Full;

impl NodeLogic for Full {
    fn kind(&self) -> &'static str {
        "Full"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("size", Trait::INTEGER).expand())
            .input(InputSpec::new("fill_value", Trait::real()).free().expand())
            .default_value("fill_value", 0.0, Trait::FLOAT)
            .output(
                OutputSpec::new("value", Trait::array(Trait::real()))
                    .expand()
                    .expression("Array[fill_value]"),
            )
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let size = count("size", inputs.value("size")?)?;
        let fill = inputs.value("fill_value")?.clone();
        Ok(TokenMap::from([ctx.emit("value", vec![fill; size])?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Evenly spaced values in `[start, stop)`.
#[derive(Clone)]
pub struct Range;

impl NodeLogic for Range {
    fn kind(&self) -> &'static str {
        "Range"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("start", Trait::real()).free().expand())
            .input(InputSpec::new("stop", Trait::real()).expand())
            .input(InputSpec::new("step", Trait::real()).free().expand())
            .default_value("start", 0, Trait::INTEGER)
            .default_value("step", 1, Trait::INTEGER)
            .output(
                OutputSpec::new("value", Trait::array(Trait::real()))
                    .expand()
                    .expression("Array[upper(start, stop, step)]"),
            )
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let start = scalar("start", inputs.value("start")?)?;
        let stop = scalar("stop", inputs.value("stop")?)?;
        let step = scalar("step", inputs.value("step")?)?;
        if step == 0.0 {
            return Err(invalid("step", "step must not be zero"));
        }
        let traits = ctx.output_trait("value")?;
        let integral = integral_elements(&traits);
        let n = ((stop - start) / step).ceil().max(0.0) as usize;
        let values: Vec<NodeValue> = (0..n)
            .map(|i| number(start + i as f64 * step, integral))
            .collect();
        Ok(TokenMap::from([ctx.emit("value", values)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// `num` evenly spaced floats from `start` to `stop`, both included.
#[derive(Clone)]
pub struct Linspace;

impl NodeLogic for Linspace {
    fn kind(&self) -> &'static str {
        "Linspace"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("start", Trait::real()).free().expand())
            .input(InputSpec::new("stop", Trait::real()).free().expand())
            .input(InputSpec::new("num", Trait::INTEGER).expand())
            .default_value("start", 0.0, Trait::FLOAT)
            .default_value("stop", 1.0, Trait::FLOAT)
            .output(OutputSpec::new("value", Trait::array(Trait::FLOAT)).expand())
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let start = scalar("start", inputs.value("start")?)?;
        let stop = scalar("stop", inputs.value("stop")?)?;
        let num = count("num", inputs.value("num")?)?;
        let values: Vec<f64> = match num {
            0 => Vec::new(),
            1 => vec![start],
            _ => {
                let step = (stop - start) / (num - 1) as f64;
                (0..num).map(|i| start + i as f64 * step).collect()
            }
        };
        Ok(TokenMap::from([ctx.emit("value", values)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Repeats each element `repeats` times: `[1, 2]` becomes `[1, 1, 2, 2]`.
/// `size` floats drawn uniformly from `[low, high)`. Array bounds give one
/// bound per drawn value. A `seed` property makes the draws reproducible.
#[derive(Clone)]
pub struct RandomUniform;

impl RandomUniform {
    fn bound(port: &str, value: Numeric<f64>, size: usize) -> Result<Vec<f64>, ExecutionError> {
        match value {
            Numeric::Scalar(x) => Ok(vec![x; size]),
            Numeric::Array(xs) if xs.len() == size => Ok(xs),
            Numeric::Array(xs) => Err(invalid(
                port,
                format!("{} bounds cannot be drawn {} times", xs.len(), size),
            )),
        }
    }
}

impl NodeLogic for RandomUniform {
    fn kind(&self) -> &'static str {
        "RandomUniform"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        let bound = Trait::real().or(Trait::array(Trait::real()));
        PortSchema::new()
            .input(InputSpec::new("low", bound.clone()).free().expand())
            .input(InputSpec::new("high", bound).free().expand())
            .input(InputSpec::new("size", Trait::INTEGER).expand())
            .default_value("low", 0.0, Trait::FLOAT)
            .default_value("high", 1.0, Trait::FLOAT)
            .output(OutputSpec::new("value", Trait::array(Trait::FLOAT)).expand())
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let size = count("size", inputs.value("size")?)?;
        let low = Self::bound("low", numeric("low", inputs.value("low")?)?, size)?;
        let high = Self::bound("high", numeric("high", inputs.value("high")?)?, size)?;
        let mut rng = match ctx.property("seed").and_then(NodeValue::as_u64) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let values: Vec<f64> = low
            .into_iter()
            .zip(high)
            .map(|(low, high)| low + (high - low) * rng.r#gen::<f64>())
            .collect();
        Ok(TokenMap::from([ctx.emit("value", values)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Repeat;

impl NodeLogic for Repeat {
    fn kind(&self) -> &'static str {
        "Repeat"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("a", Trait::array(Trait::DATA)).expand())
            .input(InputSpec::new("repeats", Trait::INTEGER).expand())
            .output(OutputSpec::new("value", Trait::array(Trait::DATA)).expand().expression("a"))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let a = items("a", inputs.value("a")?)?;
        let repeats = count("repeats", inputs.value("repeats")?)?;
        let values: Vec<NodeValue> = a
            .iter()
            .flat_map(|v| std::iter::repeat(v.clone()).take(repeats))
            .collect();
        Ok(TokenMap::from([ctx.emit("value", values)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Repeats the whole array `reps` times: `[1, 2]` becomes `[1, 2, 1, 2]`.
#[derive(Clone)]
pub struct Tile;

impl NodeLogic for Tile {
    fn kind(&self) -> &'static str {
        "Tile"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("a", Trait::array(Trait::DATA)).expand())
            .input(InputSpec::new("reps", Trait::INTEGER).expand())
            .output(OutputSpec::new("value", Trait::array(Trait::DATA)).expand().expression("a"))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let a = items("a", inputs.value("a")?)?;
        let reps = count("reps", inputs.value("reps")?)?;
        let values: Vec<NodeValue> = (0..reps).flat_map(|_| a.iter().cloned()).collect();
        Ok(TokenMap::from([ctx.emit("value", values)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// `a[start:stop:step]`. Unset bounds take their usual defaults and negative
/// indices count from the end.
#[derive(Clone)]
pub struct Slice;

impl Slice {
    fn indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
        let len = len as i64;
        let clamp = |index: i64, low: i64, high: i64| {
            let index = if index < 0 { index + len } else { index };
            index.clamp(low, high)
        };
        let mut out = Vec::new();
        if step > 0 {
            let mut i = start.map_or(0, |s| clamp(s, 0, len));
            let end = stop.map_or(len, |s| clamp(s, 0, len));
            while i < end {
                out.push(i as usize);
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
        } else {
            let mut i = start.map_or(len - 1, |s| clamp(s, -1, len - 1));
            let end = stop.map_or(-1, |s| clamp(s, -1, len - 1));
            while i > end {
                out.push(i as usize);
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
        }
        out
    }
}

impl NodeLogic for Slice {
    fn kind(&self) -> &'static str {
        "Slice"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("a", Trait::array(Trait::DATA)).expand())
            .input(InputSpec::new("start", Trait::INTEGER).free())
            .input(InputSpec::new("stop", Trait::INTEGER).free())
            .input(InputSpec::new("step", Trait::INTEGER).free())
            .output(OutputSpec::new("value", Trait::array(Trait::DATA)).expand().expression("a"))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let a = items("a", inputs.value("a")?)?;
        let bound = |port: &str| -> Result<Option<i64>, ExecutionError> {
            inputs.get(port).map(|t| integer(port, &t.value)).transpose()
        };
        let start = bound("start")?;
        let stop = bound("stop")?;
        let step = bound("step")?.unwrap_or(1);
        if step == 0 {
            return Err(invalid("step", "slice step cannot be zero"));
        }
        let values: Vec<NodeValue> = Self::indices(a.len(), start, stop, step)
            .into_iter()
            .map(|i| a[i].clone())
            .collect();
        Ok(TokenMap::from([ctx.emit("value", values)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Sum;

impl NodeLogic for Sum {
    fn kind(&self) -> &'static str {
        "Sum"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("a", Trait::array(Trait::real())).expand())
            .output(OutputSpec::new("value", Trait::real()).expand().expression("first_arg(a)"))
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let a = items("a", inputs.value("a")?)?;
        let total = if ctx.output_trait("value")? == Trait::INTEGER {
            let total = a.iter().try_fold(0_i64, |acc, v| {
                acc.checked_add(integer("a", v)?)
                    .ok_or_else(|| invalid("value", "integer sum overflows"))
            })?;
            NodeValue::from(total)
        } else {
            let total = a
                .iter()
                .map(|v| scalar("a", v))
                .sum::<Result<f64, _>>()?;
            NodeValue::from(total)
        };
        Ok(TokenMap::from([ctx.emit("value", total)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct Length;

impl NodeLogic for Length {
    fn kind(&self) -> &'static str {
        "Length"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("a", Trait::array(Trait::DATA)).expand())
            .output(OutputSpec::new("value", Trait::INTEGER).expand())
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let len = items("a", inputs.value("a")?)?.len();
        Ok(TokenMap::from([ctx.emit("value", len)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

/// Gathers a spread into a single array token.
#[derive(Clone)]
pub struct AsArray;

impl NodeLogic for AsArray {
    fn kind(&self) -> &'static str {
        "AsArray"
    }

    fn declare(&self, _properties: &Properties) -> PortSchema {
        PortSchema::new()
            .input(InputSpec::new("in1", Trait::spread(Trait::DATA)).expand())
            .output(
                OutputSpec::new("out1", Trait::array(Trait::DATA))
                    .expand()
                    .expression("Array[first_arg(in1)]"),
            )
    }

    fn core_execute(&self, inputs: &ResolvedInputs, ctx: &mut ExecContext<'_>) -> Result<TokenMap, ExecutionError> {
        let values = items("in1", inputs.value("in1")?)?.clone();
        Ok(TokenMap::from([ctx.emit("out1", values)?]))
    }

    fn clone_box(&self) -> Box<dyn NodeLogic> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::token::Token;
    use crate::nodes::testing::run;
    use serde_json::json;

    fn value(result: Result<crate::core::node::Execution, ExecutionError>) -> Token {
        result.unwrap().outputs["value"].clone()
    }

    #[test]
    fn test_full_uses_default_fill() {
        let out = value(run(Full, &[], vec![("size", Token::new(3, Trait::INTEGER))]));
        assert_eq!(out, Token::new(json!([0.0, 0.0, 0.0]), Trait::array(Trait::FLOAT)));
    }

    #[test]
    fn test_full_fill_property_override() {
        let out = value(run(
            Full,
            &[("fill_value", json!(7))],
            vec![("size", Token::new(2, Trait::INTEGER))],
        ));
        assert_eq!(out, Token::new(json!([7, 7]), Trait::array(Trait::INTEGER)));
    }

    #[test]
    fn test_range_integer_and_float() {
        let out = value(run(Range, &[], vec![("stop", Token::new(4, Trait::INTEGER))]));
        assert_eq!(out, Token::new(json!([0, 1, 2, 3]), Trait::array(Trait::INTEGER)));

        let out = value(run(
            Range,
            &[("step", json!(0.5))],
            vec![("stop", Token::new(1.5, Trait::FLOAT))],
        ));
        assert_eq!(out, Token::new(json!([0.0, 0.5, 1.0]), Trait::array(Trait::FLOAT)));
    }

    #[test]
    fn test_range_zero_step_fails() {
        let result = run(
            Range,
            &[("step", json!(0))],
            vec![("stop", Token::new(4, Trait::INTEGER))],
        );
        assert!(matches!(result, Err(ExecutionError::InvalidValue { .. })));
    }

    #[test]
    fn test_linspace_includes_endpoint() {
        let out = value(run(Linspace, &[], vec![("num", Token::new(5, Trait::INTEGER))]));
        assert_eq!(out.value, json!([0.0, 0.25, 0.5, 0.75, 1.0]));
    }

    #[test]
    fn test_random_uniform_stays_within_bounds() {
        let out = value(run(
            RandomUniform,
            &[("low", json!(2.0)), ("high", json!(3.0))],
            vec![("size", Token::new(50, Trait::INTEGER))],
        ));
        assert_eq!(out.traits, Trait::array(Trait::FLOAT));
        let values = out.value.as_array().unwrap();
        assert_eq!(values.len(), 50);
        assert!(values.iter().all(|v| (2.0..=3.0).contains(&v.as_f64().unwrap())));
    }

    #[test]
    fn test_random_uniform_seed_and_array_bounds() {
        let draw = || {
            value(run(
                RandomUniform,
                &[("seed", json!(7)), ("high", json!([1, 10, 100]))],
                vec![("size", Token::new(3, Trait::INTEGER))],
            ))
        };
        let first = draw();
        assert_eq!(first, draw());
        let values: Vec<f64> = first.value.as_array().unwrap().iter().map(|v| v.as_f64().unwrap()).collect();
        assert!(values[0] <= 1.0 && values[1] <= 10.0 && values[2] <= 100.0);

        let result = run(
            RandomUniform,
            &[("high", json!([1, 2]))],
            vec![("size", Token::new(3, Trait::INTEGER))],
        );
        assert!(matches!(result, Err(ExecutionError::InvalidValue { .. })));
    }

    #[test]
    fn test_repeat_and_tile() {
        let a = || Token::new(json!([1, 2]), Trait::array(Trait::INTEGER));
        let out = value(run(Repeat, &[], vec![("a", a()), ("repeats", Token::new(2, Trait::INTEGER))]));
        assert_eq!(out, Token::new(json!([1, 1, 2, 2]), Trait::array(Trait::INTEGER)));
        let out = value(run(Tile, &[], vec![("a", a()), ("reps", Token::new(2, Trait::INTEGER))]));
        assert_eq!(out.value, json!([1, 2, 1, 2]));
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(Slice::indices(5, Some(1), Some(4), 1), vec![1, 2, 3]);
        assert_eq!(Slice::indices(5, None, None, 2), vec![0, 2, 4]);
        assert_eq!(Slice::indices(5, Some(-2), None, 1), vec![3, 4]);
        assert_eq!(Slice::indices(5, None, None, -1), vec![4, 3, 2, 1, 0]);
        assert_eq!(Slice::indices(5, Some(10), None, 1), Vec::<usize>::new());
    }

    #[test]
    fn test_slice_node() {
        let out = value(run(
            Slice,
            &[("start", json!(1))],
            vec![("a", Token::new(json!([5, 6, 7]), Trait::array(Trait::INTEGER)))],
        ));
        assert_eq!(out, Token::new(json!([6, 7]), Trait::array(Trait::INTEGER)));
    }

    #[test]
    fn test_slice_extreme_steps() {
        assert_eq!(Slice::indices(3, Some(1), None, i64::MAX), vec![1]);
        assert_eq!(Slice::indices(3, Some(1), None, i64::MIN), vec![1]);
        assert_eq!(Slice::indices(3, None, None, i64::MIN), vec![2]);

        let a = || Token::new(json!([1, 2, 3]), Trait::array(Trait::INTEGER));
        let out = value(run(Slice, &[("start", json!(1)), ("step", json!(i64::MAX))], vec![("a", a())]));
        assert_eq!(out.value, json!([2]));
        let out = value(run(Slice, &[("start", json!(1)), ("step", json!(i64::MIN))], vec![("a", a())]));
        assert_eq!(out.value, json!([2]));
    }

    #[test]
    fn test_sum_of_large_integers_is_exact() {
        let out = value(run(
            Sum,
            &[],
            vec![("a", Token::new(json!([9007199254740993_i64, 0]), Trait::array(Trait::INTEGER)))],
        ));
        assert_eq!(out, Token::new(9007199254740993_i64, Trait::INTEGER));

        let result = run(
            Sum,
            &[],
            vec![("a", Token::new(json!([i64::MAX, 1]), Trait::array(Trait::INTEGER)))],
        );
        assert!(matches!(result, Err(ExecutionError::InvalidValue { .. })));
    }

    #[test]
    fn test_sum_keeps_element_trait() {
        let out = value(run(
            Sum,
            &[],
            vec![("a", Token::new(json!([1, 2, 3]), Trait::array(Trait::INTEGER)))],
        ));
        assert_eq!(out, Token::new(6, Trait::INTEGER));
    }

    #[test]
    fn test_length_over_spread() {
        let out = value(run(
            Length,
            &[],
            vec![(
                "a",
                Token::new(json!([[1], [1, 2]]), Trait::spread(Trait::array(Trait::INTEGER))),
            )],
        ));
        assert_eq!(out, Token::new(json!([1, 2]), Trait::spread(Trait::INTEGER)));
    }

    #[test]
    fn test_as_array_gathers_spread() {
        let result = run(
            AsArray,
            &[],
            vec![("in1", Token::new(json!([1, 2, 3]), Trait::spread(Trait::INTEGER)))],
        );
        assert_eq!(
            result.unwrap().outputs["out1"],
            Token::new(json!([1, 2, 3]), Trait::array(Trait::INTEGER))
        );
    }
}
