//! Self-declared sub-field kinds and the entity namespaces they live in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One independently addressable self-declared sub-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubFieldKind {
    Address,
    Email,
    Phone,
    Ethnicity,
    DisplayName,
}

impl SubFieldKind {
    /// All sub-fields in merge order.
    pub const ALL: [SubFieldKind; 5] = [
        SubFieldKind::Address,
        SubFieldKind::Email,
        SubFieldKind::Phone,
        SubFieldKind::Ethnicity,
        SubFieldKind::DisplayName,
    ];

    /// Name used for cache keys and as the sync queue type.
    pub fn type_name(&self) -> &'static str {
        match self {
            SubFieldKind::Address => "self_declared_address",
            SubFieldKind::Email => "self_declared_email",
            SubFieldKind::Phone => "self_declared_phone",
            SubFieldKind::Ethnicity => "self_declared_raca",
            SubFieldKind::DisplayName => "self_declared_nome_exibicao",
        }
    }

    /// Document field holding the value, both in cache payloads and in the
    /// self-declared collection.
    pub fn payload_field(&self) -> &'static str {
        match self {
            SubFieldKind::Address => "endereco",
            SubFieldKind::Email => "email",
            SubFieldKind::Phone => "telefone",
            SubFieldKind::Ethnicity => "raca",
            SubFieldKind::DisplayName => "nome_exibicao",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_name() == name)
    }
}

impl fmt::Display for SubFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubFieldKind::Address => "address",
            SubFieldKind::Email => "email",
            SubFieldKind::Phone => "phone",
            SubFieldKind::Ethnicity => "ethnicity",
            SubFieldKind::DisplayName => "display name",
        };
        f.write_str(label)
    }
}

/// Entity namespace read through the tiered cache.
///
/// The authoritative citizen document and each self-declared sub-field are
/// cached and synced independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Citizen,
    SelfDeclared(SubFieldKind),
}

impl EntityKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::Citizen => "citizen",
            EntityKind::SelfDeclared(kind) => kind.type_name(),
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        if name == "citizen" {
            return Some(EntityKind::Citizen);
        }
        SubFieldKind::from_type_name(name).map(EntityKind::SelfDeclared)
    }
}

impl From<SubFieldKind> for EntityKind {
    fn from(kind: SubFieldKind) -> Self {
        EntityKind::SelfDeclared(kind)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_type_names_are_unique() {
        let names: HashSet<_> = SubFieldKind::ALL.iter().map(|k| k.type_name()).collect();
        assert_eq!(names.len(), SubFieldKind::ALL.len());
        let fields: HashSet<_> = SubFieldKind::ALL.iter().map(|k| k.payload_field()).collect();
        assert_eq!(fields.len(), SubFieldKind::ALL.len());
    }

    #[test]
    fn test_type_name_roundtrip() {
        for kind in SubFieldKind::ALL {
            assert_eq!(SubFieldKind::from_type_name(kind.type_name()), Some(kind));
            let entity = EntityKind::from(kind);
            assert_eq!(EntityKind::from_type_name(entity.type_name()), Some(entity));
        }
        assert_eq!(EntityKind::from_type_name("citizen"), Some(EntityKind::Citizen));
        assert_eq!(EntityKind::from_type_name("pet"), None);
    }

    #[test]
    fn test_ethnicity_uses_raca_names() {
        assert_eq!(SubFieldKind::Ethnicity.type_name(), "self_declared_raca");
        assert_eq!(SubFieldKind::Ethnicity.payload_field(), "raca");
    }
}
