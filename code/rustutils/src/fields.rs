/// Readers for fields of a decoded JSON object.
///
/// Log records are loosely structured and generated by several components, so the same quantity
/// can arrive as a number in one record and as a decimal string in another.  The numeric readers
/// accept both.  Every reader returns an error if the field is absent or has the wrong type; callers
/// that treat the field as optional map the error to a default.
use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::str::FromStr;

pub type JsonObject = Map<String, Value>;

pub fn grab_str<'a>(fields: &'a JsonObject, name: &str) -> Result<&'a str> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => bail!("Field '{name}' must have a string value"),
        None => bail!("Field '{name}' not found"),
    }
}

pub fn grab_i64(fields: &JsonObject, name: &str) -> Result<i64> {
    match fields.get(name) {
        Some(Value::String(s)) => match i64::from_str(s) {
            Ok(n) => Ok(n),
            Err(_) => bail!("Field '{name}' is not a number"),
        },
        Some(Value::Number(n)) => {
            if let Some(k) = n.as_i64() {
                Ok(k)
            } else if let Some(f) = n.as_f64() {
                Ok(f as i64)
            } else {
                bail!("Field '{name}' is not a number")
            }
        }
        Some(_) => bail!("Field '{name}' is not a number"),
        None => bail!("Field '{name}' not found"),
    }
}

pub fn grab_f64(fields: &JsonObject, name: &str) -> Result<f64> {
    match fields.get(name) {
        Some(Value::String(s)) => match f64::from_str(s) {
            Ok(n) => Ok(n),
            Err(_) => bail!("Field '{name}' is not a float number"),
        },
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) => Ok(f),
            None => bail!("Field '{name}' is not a float number"),
        },
        Some(_) => bail!("Field '{name}' is not a float number"),
        None => bail!("Field '{name}' not found"),
    }
}

pub fn grab_bool(fields: &JsonObject, name: &str) -> Result<bool> {
    match fields.get(name) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => bail!("Field '{name}' must have a boolean value"),
        None => bail!("Field '{name}' not found"),
    }
}

#[cfg(test)]
fn test_object() -> JsonObject {
    let v: Value = serde_json::from_str(
        r#"{"s":"hello","n":"241436","k":12,"f":0.25,"fs":"0.5","b":true,"bad":"1x","arr":[1]}"#,
    )
    .unwrap();
    match v {
        Value::Object(m) => m,
        _ => panic!("Not an object"),
    }
}

#[test]
fn test_grab_str() {
    let obj = test_object();
    assert!(grab_str(&obj, "s").unwrap() == "hello");
    assert!(grab_str(&obj, "k").is_err());
    assert!(grab_str(&obj, "nope").is_err());
}

#[test]
fn test_grab_numbers() {
    let obj = test_object();
    assert!(grab_i64(&obj, "n").unwrap() == 241436);
    assert!(grab_i64(&obj, "k").unwrap() == 12);
    assert!(grab_i64(&obj, "f").unwrap() == 0);
    assert!(grab_i64(&obj, "bad").is_err());
    assert!(grab_i64(&obj, "arr").is_err());
    assert!(grab_i64(&obj, "nope").is_err());
    assert!(grab_f64(&obj, "f").unwrap() == 0.25);
    assert!(grab_f64(&obj, "fs").unwrap() == 0.5);
    assert!(grab_f64(&obj, "k").unwrap() == 12.0);
    assert!(grab_f64(&obj, "bad").is_err());
}

#[test]
fn test_grab_bool() {
    let obj = test_object();
    assert!(grab_bool(&obj, "b").unwrap());
    assert!(grab_bool(&obj, "s").is_err());
    assert!(grab_bool(&obj, "nope").is_err());
}
