//! Dictionary entities: accounts, categories, subcategories.
//!
//! Each entity has a fixed binary layout for the encrypted store and a
//! serde JSON shape for migration input.

use bytes::BufMut;
use serde::{Deserialize, Deserializer};
use tsvault_core::{BinaryData, BufMutExt, ByteReader, CodecError, Identifiable};

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A money account. Cash accounts have no `cash_account`; every other
/// account points at the cash account of its currency.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub id: i32,
    pub name: String,
    #[serde(rename = "valutaCode")]
    pub currency: String,
    #[serde(rename = "activeTo", default, deserialize_with = "date_array")]
    pub active_to: Option<i32>,
    /// `Some(0)` right after JSON input until the cash account is resolved.
    #[serde(rename = "isCash", deserialize_with = "cash_flag")]
    pub cash_account: Option<i32>,
}

impl Account {
    #[must_use]
    pub fn is_cash(&self) -> bool {
        self.cash_account.is_none()
    }
}

impl Identifiable for Account {
    fn id(&self) -> i32 {
        self.id
    }
}

impl BinaryData for Account {
    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.read_i32()?,
            name: reader.read_string()?,
            currency: reader.read_string()?,
            active_to: non_zero(reader.read_i32()?),
            cash_account: non_zero(reader.read_i32()?),
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.put_i32_le(self.id);
        out.put_string(&self.name);
        out.put_string(&self.currency);
        out.put_i32_le(self.active_to.unwrap_or(0));
        out.put_i32_le(self.cash_account.unwrap_or(0));
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Category {
    pub id: i32,
    pub name: String,
}

impl Identifiable for Category {
    fn id(&self) -> i32 {
        self.id
    }
}

impl BinaryData for Category {
    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            id: reader.read_i32()?,
            name: reader.read_string()?,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.put_i32_le(self.id);
        out.put_string(&self.name);
    }
}

// ---------------------------------------------------------------------------
// Subcategory
// ---------------------------------------------------------------------------

/// How an operation in a subcategory moves money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum OperationCode {
    Incm = 0,
    Expn = 1,
    Spcl = 2,
}

impl TryFrom<u8> for OperationCode {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Incm),
            1 => Ok(Self::Expn),
            2 => Ok(Self::Spcl),
            _ => Err(CodecError::InvalidTag {
                what: "operation code",
                tag,
            }),
        }
    }
}

/// Special-purpose subcategory marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum SubcategoryCode {
    Comb = 0,
    Comc = 1,
    Fuel = 2,
    Prcn = 3,
    Incc = 4,
    Expc = 5,
    Exch = 6,
    Trfr = 7,
}

/// Binary tag for a subcategory without a code.
const NO_SUBCATEGORY_CODE: u8 = 8;

impl TryFrom<u8> for SubcategoryCode {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => Self::Comb,
            1 => Self::Comc,
            2 => Self::Fuel,
            3 => Self::Prcn,
            4 => Self::Incc,
            5 => Self::Expc,
            6 => Self::Exch,
            7 => Self::Trfr,
            _ => {
                return Err(CodecError::InvalidTag {
                    what: "subcategory code",
                    tag,
                })
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subcategory {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub code: Option<SubcategoryCode>,
    #[serde(rename = "operationCodeId")]
    pub operation_code: OperationCode,
    #[serde(rename = "categoryId")]
    pub category: i32,
}

impl Identifiable for Subcategory {
    fn id(&self) -> i32 {
        self.id
    }
}

impl BinaryData for Subcategory {
    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let id = reader.read_i32()?;
        let name = reader.read_string()?;
        let code = match reader.read_u8()? {
            NO_SUBCATEGORY_CODE => None,
            tag => Some(SubcategoryCode::try_from(tag)?),
        };
        let operation_code = OperationCode::try_from(reader.read_u8()?)?;
        let category = reader.read_i32()?;
        Ok(Self {
            id,
            name,
            code,
            operation_code,
            category,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.put_i32_le(self.id);
        out.put_string(&self.name);
        out.put_u8(self.code.map_or(NO_SUBCATEGORY_CODE, |c| c as u8));
        out.put_u8(self.operation_code as u8);
        out.put_i32_le(self.category);
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Zero is the binary encoding of "absent" for optional integers.
pub(crate) fn non_zero<T: Default + PartialEq>(value: T) -> Option<T> {
    if value == T::default() {
        None
    } else {
        Some(value)
    }
}

/// Reads a `[year, month, day]` array (or `null`) as a `yyyymmdd` integer.
pub(crate) fn date_array<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    let parts = Option::<(i32, i32, i32)>::deserialize(d)?;
    Ok(parts.map(|(year, month, day)| year * 10_000 + month * 100 + day))
}

/// `isCash: true` means the account is itself a cash account.
fn cash_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    let is_cash = bool::deserialize(d)?;
    Ok(if is_cash { None } else { Some(0) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_json_shape() {
        let json = r#"{"id":3,"name":"Visa","valutaCode":"UAH","activeTo":[2023,5,31],"isCash":false}"#;
        let account: Account = serde_json::from_str(json).unwrap();
        assert_eq!(account.currency, "UAH");
        assert_eq!(account.active_to, Some(20_230_531));
        assert_eq!(account.cash_account, Some(0));
        assert!(!account.is_cash());
    }

    #[test]
    fn cash_account_json_has_no_link() {
        let json = r#"{"id":1,"name":"Cash","valutaCode":"UAH","activeTo":null,"isCash":true}"#;
        let account: Account = serde_json::from_str(json).unwrap();
        assert!(account.is_cash());
        assert_eq!(account.active_to, None);
    }

    #[test]
    fn account_binary_maps_zero_to_none() {
        let account = Account {
            id: 7,
            name: "Wallet".into(),
            currency: "EUR".into(),
            active_to: None,
            cash_account: Some(2),
        };
        let bytes = account.to_bytes();
        assert_eq!(Account::from_bytes(&bytes).unwrap(), account);
        // id, "Wallet", "EUR", active_to = 0, cash_account = 2
        assert_eq!(bytes.len(), 4 + 7 + 4 + 4 + 4);
    }

    #[test]
    fn subcategory_json_codes() {
        let json = r#"{"id":5,"name":"Fuel","code":"FUEL","operationCodeId":"EXPN","categoryId":2}"#;
        let sub: Subcategory = serde_json::from_str(json).unwrap();
        assert_eq!(sub.code, Some(SubcategoryCode::Fuel));
        assert_eq!(sub.operation_code, OperationCode::Expn);

        let json = r#"{"id":6,"name":"Salary","code":null,"operationCodeId":"INCM","categoryId":1}"#;
        let sub: Subcategory = serde_json::from_str(json).unwrap();
        assert_eq!(sub.code, None);
    }

    #[test]
    fn unknown_subcategory_code_is_rejected() {
        let json = r#"{"id":5,"name":"X","code":"WHAT","operationCodeId":"EXPN","categoryId":2}"#;
        assert!(serde_json::from_str::<Subcategory>(json).is_err());
    }

    #[test]
    fn subcategory_binary_without_code() {
        let sub = Subcategory {
            id: 9,
            name: "Transfer".into(),
            code: None,
            operation_code: OperationCode::Spcl,
            category: 4,
        };
        let bytes = sub.to_bytes();
        assert_eq!(bytes[4 + 9], NO_SUBCATEGORY_CODE);
        assert_eq!(Subcategory::from_bytes(&bytes).unwrap(), sub);
    }

    #[test]
    fn bad_operation_code_tag() {
        let mut bytes = Category {
            id: 1,
            name: "a".into(),
        }
        .to_bytes();
        bytes.push(0); // code
        bytes.push(9); // operation code
        bytes.extend_from_slice(&1_i32.to_le_bytes());
        assert_eq!(
            Subcategory::from_bytes(&bytes),
            Err(CodecError::InvalidTag {
                what: "operation code",
                tag: 9
            })
        );
    }
}
