//! Monthly ledger bucket: running totals plus the operations of the month.

use std::collections::BTreeMap;

use bytes::BufMut;
use serde::{Deserialize, Deserializer};
use tsvault_core::{write_list, BinaryData, BufMutExt, ByteReader, CodecError};

use super::entities::non_zero;

/// Value of one time bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinanceRecord {
    /// Account balances at the start of the bucket.
    pub totals: BTreeMap<i32, i64>,
    pub operations: Vec<FinanceOperation>,
}

impl FinanceRecord {
    #[must_use]
    pub fn from_operations(operations: Vec<FinanceOperation>) -> Self {
        Self {
            totals: BTreeMap::new(),
            operations,
        }
    }
}

impl BinaryData for FinanceRecord {
    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let count = reader.read_count()?;
        let mut totals = BTreeMap::new();
        for _ in 0..count {
            let account = reader.read_i32()?;
            let summa = reader.read_i64()?;
            totals.insert(account, summa);
        }
        let operations = reader.read_list()?;
        Ok(Self { totals, operations })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.put_count(self.totals.len());
        for (&account, &summa) in &self.totals {
            out.put_i32_le(account);
            out.put_i64_le(summa);
        }
        write_list(&self.operations, out);
    }
}

/// A single ledger entry. Sums are fixed-point: `summa` in 1/100,
/// `amount` (quantity, e.g. litres) in 1/1000.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FinanceOperation {
    /// Taken from the containing folder or command, never from JSON.
    #[serde(skip)]
    pub date: i32,
    #[serde(default, deserialize_with = "thousandths")]
    pub amount: Option<i64>,
    #[serde(deserialize_with = "hundredths")]
    pub summa: i64,
    #[serde(rename = "subcategoryId")]
    pub subcategory: i32,
    #[serde(rename = "accountId")]
    pub account: i32,
    #[serde(rename = "finOpProperies", default, deserialize_with = "null_as_empty")]
    pub properties: Vec<FinOpProperty>,
}

impl BinaryData for FinanceOperation {
    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            date: reader.read_i32()?,
            amount: non_zero(reader.read_i64()?),
            summa: reader.read_i64()?,
            subcategory: reader.read_i32()?,
            account: reader.read_i32()?,
            properties: reader.read_list()?,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.put_i32_le(self.date);
        out.put_i64_le(self.amount.unwrap_or(0));
        out.put_i64_le(self.summa);
        out.put_i32_le(self.subcategory);
        out.put_i32_le(self.account);
        write_list(&self.properties, out);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum PropertyCode {
    Amou = 0,
    Dist = 1,
    Netw = 2,
    Ppto = 3,
    /// Second account of a transfer or exchange.
    Seca = 4,
    Type = 5,
}

impl TryFrom<u8> for PropertyCode {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Amou),
            1 => Ok(Self::Dist),
            2 => Ok(Self::Netw),
            3 => Ok(Self::Ppto),
            4 => Ok(Self::Seca),
            5 => Ok(Self::Type),
            _ => Err(CodecError::InvalidTag {
                what: "property code",
                tag,
            }),
        }
    }
}

/// Typed attribute attached to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinOpProperty {
    #[serde(default)]
    pub numeric_value: Option<i64>,
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub date_value: Option<i32>,
    #[serde(rename = "propertyCode")]
    pub code: PropertyCode,
}

/// `i64::MAX` encodes a missing numeric value.
const NO_NUMERIC_VALUE: i64 = i64::MAX;

impl BinaryData for FinOpProperty {
    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let numeric = reader.read_i64()?;
        let string = reader.read_string()?;
        let date = reader.read_i32()?;
        let code = PropertyCode::try_from(reader.read_u8()?)?;
        Ok(Self {
            numeric_value: (numeric != NO_NUMERIC_VALUE).then_some(numeric),
            string_value: (!string.is_empty()).then_some(string),
            date_value: non_zero(date),
            code,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.put_i64_le(self.numeric_value.unwrap_or(NO_NUMERIC_VALUE));
        out.put_string(self.string_value.as_deref().unwrap_or(""));
        out.put_i32_le(self.date_value.unwrap_or(0));
        out.put_u8(self.code as u8);
    }
}

// ---------------------------------------------------------------------------
// JSON fixed-point helpers
// ---------------------------------------------------------------------------

/// Integers are already scaled; decimals are scaled and rounded.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scaled {
    Int(i64),
    Float(f64),
}

impl Scaled {
    #[allow(clippy::cast_possible_truncation)]
    fn scale(self, factor: f64) -> i64 {
        match self {
            Self::Int(v) => v,
            Self::Float(v) => (v * factor).round() as i64,
        }
    }
}

fn hundredths<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Scaled::deserialize(d).map(|s| s.scale(100.0))
}

fn thousandths<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<Scaled>::deserialize(d)?.map(|s| s.scale(1000.0)))
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<FinOpProperty>, D::Error> {
    Ok(Option::<Vec<FinOpProperty>>::deserialize(d)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fuel_purchase() -> FinanceOperation {
        FinanceOperation {
            date: 20_240_115,
            amount: Some(40_500),
            summa: 215_000,
            subcategory: 5,
            account: 3,
            properties: vec![FinOpProperty {
                numeric_value: Some(120_000),
                string_value: Some("A95".into()),
                date_value: None,
                code: PropertyCode::Dist,
            }],
        }
    }

    #[test]
    fn operation_json_scales_sums() {
        let json = r#"{
            "amount": 40.5,
            "summa": 2150.0,
            "subcategoryId": 5,
            "accountId": 3,
            "finOpProperies": [
                {"numericValue": 120000, "stringValue": "A95", "dateValue": null, "propertyCode": "DIST"}
            ]
        }"#;
        let mut op: FinanceOperation = serde_json::from_str(json).unwrap();
        assert_eq!(op.date, 0, "date is never read from JSON");
        op.date = 20_240_115;
        assert_eq!(op, fuel_purchase());
    }

    #[test]
    fn operation_json_integer_sums_are_taken_as_is() {
        let json = r#"{"summa": 12345, "subcategoryId": 1, "accountId": 1, "finOpProperies": null}"#;
        let op: FinanceOperation = serde_json::from_str(json).unwrap();
        assert_eq!(op.summa, 12_345);
        assert_eq!(op.amount, None);
        assert!(op.properties.is_empty());
    }

    #[test]
    fn type_property_code_spelling() {
        let prop: FinOpProperty =
            serde_json::from_str(r#"{"numericValue": null, "propertyCode": "TYPE"}"#).unwrap();
        assert_eq!(prop.code, PropertyCode::Type);
        assert_eq!(prop.numeric_value, None);
    }

    #[test]
    fn property_sentinels_map_to_none() {
        let prop = FinOpProperty {
            numeric_value: None,
            string_value: None,
            date_value: None,
            code: PropertyCode::Seca,
        };
        let bytes = prop.to_bytes();
        assert_eq!(&bytes[..8], &i64::MAX.to_le_bytes());
        assert_eq!(FinOpProperty::from_bytes(&bytes).unwrap(), prop);
    }

    #[test]
    fn record_binary_layout() {
        let mut record = FinanceRecord::from_operations(vec![fuel_purchase()]);
        record.totals.insert(3, 1_000_000);
        let bytes = record.to_bytes();
        assert_eq!(&bytes[..4], &1_i32.to_le_bytes());
        assert_eq!(FinanceRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn truncated_operation_fails() {
        let bytes = fuel_purchase().to_bytes();
        let err = FinanceOperation::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { .. }));
    }
}
