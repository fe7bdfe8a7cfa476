#![deny(clippy::all, clippy::pedantic)]

use std::fs;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::CliError;
use crate::args::{BodyArgs, ParamArgs};

pub fn read_body(body: BodyArgs) -> Result<Value, CliError> {
    let text = if let Some(path) = body.file {
        fs::read_to_string(&path).map_err(|source| CliError::InputFile {
            path: path.display().to_string(),
            source,
        })?
    } else if let Some(data) = body.data {
        data
    } else {
        return Err(CliError::InvalidInput("--data or --file required".into()));
    };

    let value: Value =
        serde_json::from_str(&text).map_err(|e| CliError::InvalidInput(e.to_string()))?;
    if !value.is_object() {
        return Err(CliError::InvalidInput("body must be a JSON object".into()));
    }
    Ok(value)
}

pub fn params_value(args: ParamArgs) -> Value {
    let map: Map<String, Value> = args
        .params
        .into_iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            (key, value)
        })
        .collect();
    Value::Object(map)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::InvalidInput(format!("failed to render output: {e}")))?;
    println!("{out}");
    Ok(())
}
