//! Parameter Resolver (C1, §4.1). `resolve` is the typed, expanded `val`
//! accessor; `api_val` is the cheaper boolean-coerced-but-otherwise-raw
//! accessor the original exposes for UI echo (SPEC_FULL.md §C).

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::PipelineError;
use crate::expr;
use crate::model::{Number, Param, ParamScope, ParamType, ParamValue};

fn inliner_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{%.+?%\}").expect("static inliner regex is valid"))
}

/// Evaluates `param.val` (§4.1), resolving inliners against the scoped
/// name table built from `globals` (all global-scope params visible to
/// the pipeline) and `pipeline_params` (the owning pipeline's own
/// params, needed only when `param` is job-scoped).
pub fn resolve(
    param: &Param,
    globals: &[Param],
    pipeline_params: &[Param],
) -> Result<ParamValue, PipelineError> {
    if param.param_type == ParamType::Boolean {
        return Ok(ParamValue::Bool(param.value == "1"));
    }

    let mut names = base_names();
    match param.scope() {
        ParamScope::Global => {}
        ParamScope::Pipeline(_) => add_globals(&mut names, globals)?,
        ParamScope::Job(_) => {
            add_globals(&mut names, globals)?;
            add_pipeline_params(&mut names, pipeline_params, globals)?;
        }
    }

    let expanded = expand(param, &names)?;
    Ok(coerce(&expanded, param.param_type))
}

/// The `api_val` accessor (SPEC_FULL.md §C): boolean param values are
/// still coerced, everything else is returned raw and unexpanded.
pub fn api_val(param: &Param) -> ParamValue {
    if param.param_type == ParamType::Boolean {
        ParamValue::Bool(param.value == "1")
    } else {
        ParamValue::String(param.value.clone())
    }
}

fn base_names() -> HashMap<String, expr::Value> {
    let mut names = HashMap::with_capacity(2);
    names.insert("True".to_string(), expr::Value::Bool(true));
    names.insert("False".to_string(), expr::Value::Bool(false));
    names
}

fn add_globals(names: &mut HashMap<String, expr::Value>, globals: &[Param]) -> Result<(), PipelineError> {
    for g in globals {
        let value = resolve(g, &[], &[])?;
        if let Some(v) = to_expr_value(&value) {
            names.insert(g.name.clone(), v);
        }
    }
    Ok(())
}

fn add_pipeline_params(
    names: &mut HashMap<String, expr::Value>,
    pipeline_params: &[Param],
    globals: &[Param],
) -> Result<(), PipelineError> {
    for p in pipeline_params {
        let value = resolve(p, globals, &[])?;
        if let Some(v) = to_expr_value(&value) {
            names.insert(p.name.clone(), v);
        }
    }
    Ok(())
}

/// List-valued params have no representation in the expression grammar
/// (it has no list literal or indexing); they are simply not added to
/// the name table, matching the grammar's deliberately restricted scope.
fn to_expr_value(v: &ParamValue) -> Option<expr::Value> {
    match v {
        ParamValue::String(s) => Some(expr::Value::Str(s.clone())),
        ParamValue::Bool(b) => Some(expr::Value::Bool(*b)),
        ParamValue::Number(Number::Int(i)) => Some(expr::Value::Num(*i as f64)),
        ParamValue::Number(Number::Float(f)) => Some(expr::Value::Num(*f)),
        ParamValue::StringList(_) | ParamValue::NumberList(_) => None,
    }
}

fn expand(param: &Param, names: &HashMap<String, expr::Value>) -> Result<String, PipelineError> {
    let mut result = String::with_capacity(param.value.len());
    let mut last_end = 0;
    for m in inliner_regex().find_iter(&param.value) {
        result.push_str(&param.value[last_end..m.start()]);
        let inner = m.as_str()[2..m.as_str().len() - 2].trim();
        let evaluated = expr::eval(inner, names).map_err(|message| PipelineError::BadExpression {
            param_id: param.id,
            param_name: param.name.clone(),
            message,
        })?;
        result.push_str(&evaluated.to_string());
        last_end = m.end();
    }
    result.push_str(&param.value[last_end..]);
    Ok(result)
}

fn coerce(expanded: &str, param_type: ParamType) -> ParamValue {
    match param_type {
        ParamType::Boolean => unreachable!("boolean params return before expansion"),
        ParamType::Number => ParamValue::Number(parse_num(expanded)),
        ParamType::StringList => {
            ParamValue::StringList(expanded.split('\n').map(str::to_string).collect())
        }
        ParamType::NumberList => ParamValue::NumberList(
            expanded
                .split('\n')
                .filter(|line| !line.trim().is_empty())
                .map(|line| parse_num(line.trim()))
                .collect(),
        ),
        ParamType::String => ParamValue::String(expanded.to_string()),
    }
}

/// `int` if parseable, else `float`, else `0` — a numeric parse failure
/// is silently swallowed rather than raised (§4.1 step 6, §9 Open
/// Question; preserved as-is per DESIGN.md).
fn parse_num(s: &str) -> Number {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        Number::Int(i)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        Number::Float(f)
    } else {
        Number::zero()
    }
}
