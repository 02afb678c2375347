// Copyright 2023-2025 StorSwift Inc.
// SPDX-License-Identifier: Apache-2.0

use super::identity::{Address, SignerRecord};

use anyhow::{bail, Result};
use toml::{Table, Value};

/// Create Map<String, Value> from (key:&str, value:Value), requires value to implement `Into<Value>`
macro_rules! map {
    ($($key:literal : $value:expr),* $(,)?) => {
        {
            let kv = [$(($key.to_string(), ::toml::Value::from($value))),*];
            IntoIterator::into_iter(kv).collect::<::toml::Table>()
        }
    };
}

/// Get value by $key:&str, define resulting type of value by $method
macro_rules! get {
    ($map:expr, $key:literal, $method:ident) => {
        $map.get($key)
            .and_then(|v| v.$method())
            .ok_or_else(|| anyhow::anyhow!(concat!("Expected ", $key)))
    };
}

pub(crate) use get;
pub(crate) use map;

pub trait IntoToml: Sized {
    fn to_value(&self) -> Result<Value>;

    fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(&self.to_value()?)?)
    }
}

pub trait FromToml: Sized {
    fn from_value(value: &Value) -> Result<Self>;

    fn from_toml(toml: &str) -> Result<Self> {
        Self::from_value(&toml::from_str(toml)?)
    }
}

impl IntoToml for SignerRecord {
    fn to_value(&self) -> Result<Value> {
        let map = map! {
            "Address": self.address.to_string(),
            "Key":     hex::encode(&self.key),
        };
        Ok(Value::Table(map))
    }
}

impl FromToml for SignerRecord {
    /// Address is optional, it is derived from the key when absent.
    fn from_value(value: &Value) -> Result<Self> {
        let key = hex::decode(get!(value, "Key", as_str)?)?;
        let record = match value.get("Address") {
            Some(address) => {
                let Some(address) = address.as_str() else {
                    bail!("toml: signer address must be a string")
                };
                SignerRecord::new(address.parse::<Address>()?, key)
            }
            None => SignerRecord::from_key(key),
        };

        Ok(record)
    }
}

/// Encodes records as an array of tables.
pub fn records_to_value(records: &[SignerRecord]) -> Result<Value> {
    let array = records
        .iter()
        .map(IntoToml::to_value)
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Array(array))
}

pub fn records_from_value(value: &Value) -> Result<Vec<SignerRecord>> {
    let Some(array) = value.as_array() else {
        bail!("toml: expected array of signers")
    };
    array.iter().map(SignerRecord::from_value).collect()
}

/// TOML integers are signed, heights above `i64::MAX` are not representable.
pub fn height_to_value(height: u64) -> Result<Value> {
    match i64::try_from(height) {
        Ok(v) => Ok(Value::Integer(v)),
        Err(_) => bail!("toml: height {height} is out of range"),
    }
}

pub fn height_from_value(value: &Value, key: &str) -> Result<u64> {
    let Some(raw) = value.get(key).and_then(Value::as_integer) else {
        bail!("Expected {key}")
    };
    match u64::try_from(raw) {
        Ok(v) => Ok(v),
        Err(_) => bail!("toml: {key} must not be negative, received {raw}"),
    }
}

/// Inserts `value` under `key` into a table value.
pub fn insert(target: &mut Value, key: &str, value: Value) -> Result<()> {
    let Some(table) = target.as_table_mut() else {
        bail!("toml: expected table")
    };
    table.insert(key.to_string(), value);
    Ok(())
}

/// Empty table to build documents incrementally.
pub fn table() -> Value {
    Value::Table(Table::new())
}
