//! Citizen record and self-declared sub-field values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CitizenId, RmiError, RmiResult, SubFieldKind, Timestamp};

/// `origem` stamped on every value the citizen declares.
pub const ORIGIN_SELF_DECLARED: &str = "self-declared";

/// `sistema` stamped on every value written by this engine.
pub const SYSTEM_RMI: &str = "rmi";

// ============================================================================
// SUB-FIELD VALUE TYPES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressPrincipal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bairro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cep: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complemento: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estado: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logradouro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo_logradouro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sistema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicador: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<AddressPrincipal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailPrincipal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sistema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Email {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicador: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<EmailPrincipal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhonePrincipal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sistema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Phone sub-field. `indicador` is the verified flag: a phone only counts
/// as the citizen's phone once it is `Some(true)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicador: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<PhonePrincipal>,
}

impl Phone {
    pub fn is_verified(&self) -> bool {
        self.indicador == Some(true)
    }
}

// ============================================================================
// SELF-DECLARED INPUTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInput {
    pub bairro: String,
    pub cep: String,
    #[serde(default)]
    pub complemento: Option<String>,
    pub estado: String,
    pub logradouro: String,
    pub municipio: String,
    pub numero: String,
    #[serde(default)]
    pub tipo_logradouro: Option<String>,
}

impl AddressInput {
    /// Build the self-declared address value this input declares.
    pub fn to_address(&self, now: Timestamp) -> Address {
        Address {
            indicador: Some(true),
            principal: Some(AddressPrincipal {
                bairro: Some(self.bairro.clone()),
                cep: Some(self.cep.clone()),
                complemento: self.complemento.clone(),
                estado: Some(self.estado.clone()),
                logradouro: Some(self.logradouro.clone()),
                municipio: Some(self.municipio.clone()),
                numero: Some(self.numero.clone()),
                tipo_logradouro: self.tipo_logradouro.clone(),
                origem: Some(ORIGIN_SELF_DECLARED.to_string()),
                sistema: Some(SYSTEM_RMI.to_string()),
                updated_at: Some(now),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailInput {
    pub valor: String,
}

impl EmailInput {
    pub fn to_email(&self, now: Timestamp) -> Email {
        Email {
            indicador: Some(true),
            principal: Some(EmailPrincipal {
                valor: Some(self.valor.clone()),
                origem: Some(ORIGIN_SELF_DECLARED.to_string()),
                sistema: Some(SYSTEM_RMI.to_string()),
                updated_at: Some(now),
            }),
        }
    }
}

/// Phone number as submitted: country code, area code (required only for
/// `55`), subscriber number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneInput {
    pub ddi: String,
    #[serde(default)]
    pub ddd: String,
    pub valor: String,
}

impl PhoneInput {
    pub fn full_number(&self) -> String {
        format!("{}{}{}", self.ddi, self.ddd, self.valor)
    }

    /// Phone value carrying this number. Only verified phones are stamped
    /// with origin and system.
    pub fn to_phone(&self, verified: bool, now: Timestamp) -> Phone {
        let (origem, sistema) = if verified {
            (
                Some(ORIGIN_SELF_DECLARED.to_string()),
                Some(SYSTEM_RMI.to_string()),
            )
        } else {
            (None, None)
        };
        Phone {
            indicador: Some(verified),
            principal: Some(PhonePrincipal {
                ddi: Some(self.ddi.clone()),
                ddd: Some(self.ddd.clone()),
                valor: Some(self.valor.clone()),
                origem,
                sistema,
                updated_at: Some(now),
            }),
        }
    }
}

/// One self-declared sub-field as submitted by the citizen, before
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum SubFieldInput {
    Address(AddressInput),
    Email(EmailInput),
    Phone(PhoneInput),
    Ethnicity(String),
    DisplayName(String),
}

impl SubFieldInput {
    pub fn kind(&self) -> SubFieldKind {
        match self {
            SubFieldInput::Address(_) => SubFieldKind::Address,
            SubFieldInput::Email(_) => SubFieldKind::Email,
            SubFieldInput::Phone(_) => SubFieldKind::Phone,
            SubFieldInput::Ethnicity(_) => SubFieldKind::Ethnicity,
            SubFieldInput::DisplayName(_) => SubFieldKind::DisplayName,
        }
    }
}

// ============================================================================
// SUB-FIELD RECORDS
// ============================================================================

/// Typed value of one self-declared sub-field.
#[derive(Debug, Clone, PartialEq)]
pub enum SubFieldValue {
    Address(Address),
    Email(Email),
    Phone(Phone),
    Ethnicity(String),
    DisplayName(String),
}

impl SubFieldValue {
    pub fn kind(&self) -> SubFieldKind {
        match self {
            SubFieldValue::Address(_) => SubFieldKind::Address,
            SubFieldValue::Email(_) => SubFieldKind::Email,
            SubFieldValue::Phone(_) => SubFieldKind::Phone,
            SubFieldValue::Ethnicity(_) => SubFieldKind::Ethnicity,
            SubFieldValue::DisplayName(_) => SubFieldKind::DisplayName,
        }
    }

    pub fn to_json(&self) -> RmiResult<Value> {
        let encoded = match self {
            SubFieldValue::Address(v) => serde_json::to_value(v),
            SubFieldValue::Email(v) => serde_json::to_value(v),
            SubFieldValue::Phone(v) => serde_json::to_value(v),
            SubFieldValue::Ethnicity(v) | SubFieldValue::DisplayName(v) => {
                Ok(Value::String(v.clone()))
            }
        };
        encoded.map_err(|e| RmiError::serialization(self.kind().type_name(), e))
    }

    pub fn from_json(kind: SubFieldKind, value: Value) -> RmiResult<Self> {
        fn decode<T: DeserializeOwned>(kind: SubFieldKind, value: Value) -> RmiResult<T> {
            serde_json::from_value(value).map_err(|e| RmiError::serialization(kind.type_name(), e))
        }

        Ok(match kind {
            SubFieldKind::Address => SubFieldValue::Address(decode(kind, value)?),
            SubFieldKind::Email => SubFieldValue::Email(decode(kind, value)?),
            SubFieldKind::Phone => SubFieldValue::Phone(decode(kind, value)?),
            SubFieldKind::Ethnicity => SubFieldValue::Ethnicity(decode(kind, value)?),
            SubFieldKind::DisplayName => SubFieldValue::DisplayName(decode(kind, value)?),
        })
    }
}

/// One sub-field value plus the timestamp of its last declaration.
///
/// `updated_at` is `None` for legacy records that predate timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct SubFieldRecord {
    pub cpf: CitizenId,
    pub value: SubFieldValue,
    pub updated_at: Option<Timestamp>,
}

impl SubFieldRecord {
    pub fn new(cpf: CitizenId, value: SubFieldValue, updated_at: Timestamp) -> Self {
        Self {
            cpf,
            value,
            updated_at: Some(updated_at),
        }
    }

    pub fn kind(&self) -> SubFieldKind {
        self.value.kind()
    }

    /// Document written to the write buffer, read cache and sync job:
    /// `{"cpf", "<payload field>", "updated_at"}`.
    pub fn to_payload(&self) -> RmiResult<Value> {
        let mut doc = Map::new();
        doc.insert("cpf".to_string(), Value::String(self.cpf.to_string()));
        doc.insert(
            self.kind().payload_field().to_string(),
            self.value.to_json()?,
        );
        if let Some(updated_at) = self.updated_at {
            doc.insert(
                "updated_at".to_string(),
                Value::String(updated_at.to_rfc3339()),
            );
        }
        Ok(Value::Object(doc))
    }

    /// Extract one sub-field from a payload or from a full self-declared
    /// document. Returns `Ok(None)` when the field is absent or null.
    pub fn from_document(kind: SubFieldKind, cpf: &CitizenId, doc: &Value) -> RmiResult<Option<Self>> {
        let Some(raw) = doc.get(kind.payload_field()) else {
            return Ok(None);
        };
        if raw.is_null() {
            return Ok(None);
        }
        let value = SubFieldValue::from_json(kind, raw.clone())?;
        let updated_at = match doc.get("updated_at") {
            Some(Value::Null) | None => None,
            Some(ts) => Some(
                serde_json::from_value::<DateTime<Utc>>(ts.clone())
                    .map_err(|e| RmiError::serialization("updated_at", e))?,
            ),
        };
        Ok(Some(Self {
            cpf: cpf.clone(),
            value,
            updated_at,
        }))
    }
}

/// The self-declared sub-fields found for one citizen, at most one per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelfDeclaredSet {
    records: BTreeMap<SubFieldKind, SubFieldRecord>,
}

impl SelfDeclaredSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless its kind is already present. Returns whether
    /// the record was accepted, so earlier (fresher) tiers win.
    pub fn accept(&mut self, record: SubFieldRecord) -> bool {
        let kind = record.kind();
        if self.records.contains_key(&kind) {
            return false;
        }
        self.records.insert(kind, record);
        true
    }

    pub fn get(&self, kind: SubFieldKind) -> Option<&SubFieldRecord> {
        self.records.get(&kind)
    }

    pub fn contains(&self, kind: SubFieldKind) -> bool {
        self.records.contains_key(&kind)
    }

    /// Kinds still missing, in merge order.
    pub fn missing(&self) -> Vec<SubFieldKind> {
        SubFieldKind::ALL
            .into_iter()
            .filter(|k| !self.records.contains_key(k))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.records.len() == SubFieldKind::ALL.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn address(&self) -> Option<&Address> {
        match self.get(SubFieldKind::Address).map(|r| &r.value) {
            Some(SubFieldValue::Address(v)) => Some(v),
            _ => None,
        }
    }

    pub fn email(&self) -> Option<&Email> {
        match self.get(SubFieldKind::Email).map(|r| &r.value) {
            Some(SubFieldValue::Email(v)) => Some(v),
            _ => None,
        }
    }

    pub fn phone(&self) -> Option<&Phone> {
        match self.get(SubFieldKind::Phone).map(|r| &r.value) {
            Some(SubFieldValue::Phone(v)) => Some(v),
            _ => None,
        }
    }

    pub fn ethnicity(&self) -> Option<&str> {
        match self.get(SubFieldKind::Ethnicity).map(|r| &r.value) {
            Some(SubFieldValue::Ethnicity(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self.get(SubFieldKind::DisplayName).map(|r| &r.value) {
            Some(SubFieldValue::DisplayName(v)) => Some(v.as_str()),
            _ => None,
        }
    }
}

// ============================================================================
// CITIZEN
// ============================================================================

/// Citizen document: the bulk-ingested authoritative record, or the
/// composite view once self-declared values are overlaid.
///
/// Only the fields the engine overlays are typed; everything else the
/// ingestion pipeline stores (documents, wallet data, health data) rides
/// along untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citizen {
    pub cpf: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endereco: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Email>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telefone: Option<Phone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raca: Option<String>,
    /// Always serialized, `null` when the citizen never declared one.
    #[serde(default)]
    pub nome_exibicao: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Citizen {
    /// Empty record for a citizen with no authoritative data.
    pub fn empty(cpf: &CitizenId) -> Self {
        Self {
            cpf: cpf.to_string(),
            ..Default::default()
        }
    }
}
