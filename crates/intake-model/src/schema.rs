//! Field Schema Registry
//!
//! Static tables describing what can be read from each document type and
//! where each value lives in the Record Store. The registry is constructed
//! once ([`SchemaRegistry::standard`]) and handed to every component that
//! needs it; nothing reaches for it as global state.

use serde::{Deserialize, Serialize};

// ============================================================================
// Field definitions
// ============================================================================

/// How a field's value is interpreted for normalization and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Name,
    Date,
    Phone,
    Identifier,
    Email,
}

/// Coarse grouping used for prompts and display ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    Personal,
    Contact,
    Address,
    Immigration,
    Employment,
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub key: String,
    pub label: String,
    /// Record Store field name. `None` marks a document-only field that is
    /// never diffed against the store.
    pub external_field: Option<String>,
    /// Lives on the biographic sub-record rather than the primary record.
    pub biographic: bool,
    pub value_type: ValueType,
    pub group: FieldGroup,
}

impl FieldDefinition {
    pub fn is_document_only(&self) -> bool {
        self.external_field.is_none()
    }

    pub fn is_name(&self) -> bool {
        self.value_type == ValueType::Name
    }
}

/// Record Store fields that belong to the biographic sub-record.
pub const BIOGRAPHIC_FIELDS: &[&str] = &[
    "AlienNumber",
    "BirthDate",
    "BirthCity",
    "BirthState",
    "BirthCountry",
    "Gender",
    "MaritalStatus",
    "NativeLanguage",
    "Citizenship1Country",
    "Citizenship2Country",
    "CurrentImmigrationStatus",
    "DateOfEntryToUsa",
    "SSN",
];

/// Field keys that always hold a date even when no schema entry says so
/// (marriage details and history ranges).
const EXTRA_DATE_KEYS: &[&str] = &[
    "date_of_marriage",
    "date_marriage_ended",
    "from_date",
    "to_date",
    "start_date",
    "end_date",
];

pub const FIRST_NAME: &str = "first_name";
pub const MIDDLE_NAME: &str = "middle_name";
pub const LAST_NAME: &str = "last_name";
pub const DATE_OF_BIRTH: &str = "date_of_birth";
pub const IDENTIFIER: &str = "a_number";
/// Name-like person keys, in display order.
pub const NAME_KEYS: [&str; 3] = [FIRST_NAME, MIDDLE_NAME, LAST_NAME];

/// Mapped field (primary record or biographic, decided by [`BIOGRAPHIC_FIELDS`]).
fn mapped(key: &str, label: &str, external: &str, value_type: ValueType, group: FieldGroup) -> FieldDefinition {
    FieldDefinition {
        key: key.to_string(),
        label: label.to_string(),
        external_field: Some(external.to_string()),
        biographic: BIOGRAPHIC_FIELDS.contains(&external),
        value_type,
        group,
    }
}

fn document_only(key: &str, label: &str, value_type: ValueType) -> FieldDefinition {
    FieldDefinition {
        key: key.to_string(),
        label: label.to_string(),
        external_field: None,
        biographic: false,
        value_type,
        group: FieldGroup::Document,
    }
}

fn first_name() -> FieldDefinition {
    mapped(FIRST_NAME, "First Name", "FirstName", ValueType::Name, FieldGroup::Personal)
}

fn middle_name() -> FieldDefinition {
    mapped(MIDDLE_NAME, "Middle Name", "MiddleName", ValueType::Name, FieldGroup::Personal)
}

fn last_name() -> FieldDefinition {
    mapped(LAST_NAME, "Last Name", "LastName", ValueType::Name, FieldGroup::Personal)
}

fn date_of_birth() -> FieldDefinition {
    mapped(DATE_OF_BIRTH, "Date of Birth", "BirthDate", ValueType::Date, FieldGroup::Personal)
}

fn identifier() -> FieldDefinition {
    mapped(IDENTIFIER, "A-Number", "AlienNumber", ValueType::Identifier, FieldGroup::Immigration)
}

// ============================================================================
// Document types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentType {
    pub key: String,
    pub display_name: String,
    pub description: String,
    pub fields: Vec<FieldDefinition>,
    /// Keys the validator expects to be present and non-empty.
    pub required: Vec<String>,
}

impl DocumentType {
    pub fn field(&self, key: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Fields that map onto the Record Store.
    pub fn mapped_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| !f.is_document_only())
    }
}

fn document_type(
    key: &str,
    display_name: &str,
    description: &str,
    fields: Vec<FieldDefinition>,
    required: &[&str],
) -> DocumentType {
    DocumentType {
        key: key.to_string(),
        display_name: display_name.to_string(),
        description: description.to_string(),
        fields,
        required: required.iter().map(|s| s.to_string()).collect(),
    }
}

fn questionnaire_fields() -> Vec<FieldDefinition> {
    use FieldGroup::*;
    use ValueType::*;
    vec![
        first_name(),
        middle_name(),
        last_name(),
        date_of_birth(),
        mapped("place_of_birth", "Place of Birth", "BirthCity", Text, Personal),
        mapped("country_of_birth", "Country of Birth", "BirthCountry", Text, Personal),
        mapped("gender", "Gender", "Gender", Text, Personal),
        mapped("marital_status", "Marital Status", "MaritalStatus", Text, Personal),
        mapped("nationality", "Nationality/Citizenship", "Citizenship1Country", Text, Personal),
        mapped("cell_phone", "Cell Phone", "CellPhone", Phone, Contact),
        mapped("home_phone", "Home Phone", "HomePhone", Phone, Contact),
        mapped("email", "Email", "EmailPersonal", Email, Contact),
        mapped("address_line1", "Address Line 1", "AddressLine1", Text, Address),
        mapped("address_line2", "Address Line 2", "AddressLine2", Text, Address),
        mapped("city", "City", "City", Text, Address),
        mapped("state", "State", "State", Text, Address),
        mapped("zip_code", "ZIP Code", "PostalZipCode", Text, Address),
        identifier(),
        mapped("date_of_entry", "Date of Entry to US", "DateOfEntryToUsa", Date, Immigration),
        mapped("immigration_status", "Immigration Status", "CurrentImmigrationStatus", Text, Immigration),
        mapped("native_language", "Native Language", "NativeLanguage", Text, Immigration),
        mapped("employer", "Employer", "Employer", Text, Employment),
        mapped("occupation", "Occupation", "Occupation", Text, Employment),
    ]
}

fn standard_document_types() -> Vec<DocumentType> {
    use FieldGroup::*;
    use ValueType::*;

    let mut n400_fields = questionnaire_fields();
    n400_fields.push(document_only("green_card_number", "Green Card Number", Identifier));

    vec![
        document_type(
            "questionnaire",
            "Client Questionnaire",
            "Immigration questionnaire with biographical data",
            questionnaire_fields(),
            &[],
        ),
        document_type(
            "questionnaire_589",
            "Asylum (I-589) Questionnaire",
            "Asylum intake questionnaire",
            questionnaire_fields(),
            &[FIRST_NAME, LAST_NAME, DATE_OF_BIRTH, "country_of_birth"],
        ),
        document_type(
            "questionnaire_i485",
            "Adjustment (I-485) Questionnaire",
            "Adjustment of status intake questionnaire",
            questionnaire_fields(),
            &[FIRST_NAME, LAST_NAME, DATE_OF_BIRTH, IDENTIFIER],
        ),
        document_type(
            "questionnaire_n400",
            "Naturalization (N-400) Questionnaire",
            "Naturalization intake questionnaire",
            n400_fields,
            &[FIRST_NAME, LAST_NAME, DATE_OF_BIRTH, IDENTIFIER, "green_card_number"],
        ),
        document_type(
            "questionnaire_consult",
            "Consultation Questionnaire",
            "Initial consultation intake form",
            questionnaire_fields(),
            &[FIRST_NAME, LAST_NAME],
        ),
        document_type(
            "passport",
            "Passport",
            "Foreign passport document",
            vec![
                first_name(),
                last_name(),
                date_of_birth(),
                mapped("place_of_birth", "Place of Birth", "BirthCity", Text, Personal),
                mapped("nationality", "Nationality", "Citizenship1Country", Text, Personal),
                mapped("gender", "Gender", "Gender", Text, Personal),
                document_only("passport_number", "Passport Number", Text),
                document_only("issue_date", "Issue Date", Date),
                document_only("expiration_date", "Expiration Date", Date),
                document_only("issuing_country", "Issuing Country", Text),
            ],
            &[FIRST_NAME, LAST_NAME, DATE_OF_BIRTH, "passport_number", "issuing_country"],
        ),
        document_type(
            "ead_card",
            "Employment Authorization Document",
            "EAD/Work Permit card",
            vec![
                first_name(),
                last_name(),
                date_of_birth(),
                mapped("country_of_birth", "Country of Birth", "BirthCountry", Text, Personal),
                identifier(),
                document_only("uscis_number", "USCIS Number", Identifier),
                document_only("category", "Category", Text),
                document_only("card_expires", "Card Expires", Date),
            ],
            &[FIRST_NAME, LAST_NAME, IDENTIFIER, "category"],
        ),
        document_type(
            "green_card",
            "Permanent Resident Card",
            "Green Card / PR Card",
            vec![
                first_name(),
                last_name(),
                date_of_birth(),
                mapped("country_of_birth", "Country of Birth", "BirthCountry", Text, Personal),
                identifier(),
                document_only("uscis_number", "USCIS Number", Identifier),
                document_only("category", "Category", Text),
                document_only("resident_since", "Resident Since", Date),
                document_only("card_expires", "Card Expires", Date),
            ],
            &[FIRST_NAME, LAST_NAME, IDENTIFIER],
        ),
        document_type(
            "birth_certificate",
            "Birth Certificate",
            "Foreign or US birth certificate",
            vec![
                first_name(),
                middle_name(),
                last_name(),
                date_of_birth(),
                mapped("place_of_birth", "Place of Birth", "BirthCity", Text, Personal),
                mapped("country_of_birth", "Country of Birth", "BirthCountry", Text, Personal),
                document_only("father_name", "Father's Name", Name),
                document_only("mother_name", "Mother's Name", Name),
            ],
            &[],
        ),
        document_type(
            "id_card",
            "ID Card",
            "State ID, Driver's License, or foreign ID",
            vec![
                first_name(),
                last_name(),
                date_of_birth(),
                mapped("address_line1", "Address", "AddressLine1", Text, Address),
                mapped("city", "City", "City", Text, Address),
                mapped("state", "State", "State", Text, Address),
                mapped("zip_code", "ZIP Code", "PostalZipCode", Text, Address),
                document_only("id_number", "ID Number", Text),
                document_only("issue_date", "Issue Date", Date),
                document_only("expiration_date", "Expiration Date", Date),
            ],
            &[],
        ),
        document_type(
            "i94",
            "I-94 Arrival/Departure Record",
            "USCIS I-94 form",
            vec![
                first_name(),
                last_name(),
                date_of_birth(),
                mapped(
                    "country_of_citizenship",
                    "Country of Citizenship",
                    "Citizenship1Country",
                    Text,
                    Personal,
                ),
                document_only("passport_number", "Passport Number", Text),
                mapped("date_of_entry", "Date of Entry", "DateOfEntryToUsa", Date, Immigration),
                document_only("class_of_admission", "Class of Admission", Text),
                document_only("admit_until", "Admit Until Date", Date),
                document_only("i94_number", "I-94 Number", Identifier),
            ],
            &[],
        ),
    ]
}

// ============================================================================
// Relationships and history
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipType {
    pub key: String,
    pub display_name: String,
    /// Relationship label sent to the Record Store when linking.
    pub external_label: String,
}

/// Structured history record kinds the Record Store may support natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredKind {
    Address,
    Employment,
    Education,
    Travel,
}

impl StructuredKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructuredKind::Address => "address",
            StructuredKind::Employment => "employment",
            StructuredKind::Education => "education",
            StructuredKind::Travel => "travel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "address" => Some(StructuredKind::Address),
            "employment" => Some(StructuredKind::Employment),
            "education" => Some(StructuredKind::Education),
            "travel" => Some(StructuredKind::Travel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryType {
    pub key: String,
    pub display_name: String,
    pub fields: Vec<FieldDefinition>,
    pub structured: Option<StructuredKind>,
    pub start_key: String,
    pub end_key: String,
}

fn history_field(key: &str, label: &str, external: &str, value_type: ValueType, group: FieldGroup) -> FieldDefinition {
    FieldDefinition {
        key: key.to_string(),
        label: label.to_string(),
        external_field: Some(external.to_string()),
        biographic: false,
        value_type,
        group,
    }
}

fn standard_history_types() -> Vec<HistoryType> {
    use FieldGroup::*;
    use ValueType::*;

    let range = |group: FieldGroup| {
        vec![
            history_field("from_date", "From", "FromDate", Date, group),
            history_field("to_date", "To", "ToDate", Date, group),
        ]
    };

    let mut address = vec![
        history_field("address_line1", "Street", "AddressLine1", Text, Address),
        history_field("address_line2", "Apt/Unit", "AddressLine2", Text, Address),
        history_field("city", "City", "City", Text, Address),
        history_field("state", "State/Province", "State", Text, Address),
        history_field("zip_code", "Postal Code", "PostalZipCode", Text, Address),
        history_field("country", "Country", "Country", Text, Address),
    ];
    address.extend(range(Address));

    let mut employment = vec![
        history_field("employer", "Employer", "EmployerName", Text, Employment),
        history_field("occupation", "Occupation", "Occupation", Text, Employment),
        history_field("city", "City", "City", Text, Employment),
        history_field("country", "Country", "Country", Text, Employment),
    ];
    employment.extend(range(Employment));

    let mut education = vec![
        history_field("school", "School", "SchoolName", Text, Personal),
        history_field("degree", "Degree/Field", "Degree", Text, Personal),
        history_field("city", "City", "City", Text, Personal),
        history_field("country", "Country", "Country", Text, Personal),
    ];
    education.extend(range(Personal));

    let mut travel = vec![
        history_field("country", "Country", "Country", Text, Immigration),
        history_field("purpose", "Purpose", "Purpose", Text, Immigration),
        history_field("port_of_entry", "Port of Entry", "PortOfEntry", Text, Immigration),
    ];
    travel.extend(range(Immigration));

    let history = |key: &str, display: &str, fields, kind| HistoryType {
        key: key.to_string(),
        display_name: display.to_string(),
        fields,
        structured: Some(kind),
        start_key: "from_date".to_string(),
        end_key: "to_date".to_string(),
    };

    vec![
        history("address", "Address History", address, StructuredKind::Address),
        history("employment", "Employment History", employment, StructuredKind::Employment),
        history("education", "Education History", education, StructuredKind::Education),
        history("travel", "Travel History", travel, StructuredKind::Travel),
    ]
}

fn standard_relationships() -> Vec<RelationshipType> {
    [
        ("spouse", "Spouse", "Spouse"),
        ("former_spouse", "Former Spouse", "Former Spouse"),
        ("child", "Child", "Child"),
        ("parent", "Parent", "Parent"),
        ("sibling", "Sibling", "Sibling"),
    ]
    .into_iter()
    .map(|(key, display, label)| RelationshipType {
        key: key.to_string(),
        display_name: display.to_string(),
        external_label: label.to_string(),
    })
    .collect()
}

/// Attributes read for each family member, with their Record Store mapping.
fn standard_person_fields() -> Vec<FieldDefinition> {
    use FieldGroup::*;
    use ValueType::*;
    vec![
        first_name(),
        middle_name(),
        last_name(),
        date_of_birth(),
        mapped("city_of_birth", "City of Birth", "BirthCity", Text, Personal),
        mapped("country_of_birth", "Country of Birth", "BirthCountry", Text, Personal),
        mapped("gender", "Gender", "Gender", Text, Personal),
        mapped("citizenship", "Citizenship", "Citizenship1Country", Text, Personal),
        identifier(),
        mapped("immigration_status", "Immigration Status", "CurrentImmigrationStatus", Text, Immigration),
    ]
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable lookup tables shared by every pipeline component.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    document_types: Vec<DocumentType>,
    relationships: Vec<RelationshipType>,
    history_types: Vec<HistoryType>,
    person_fields: Vec<FieldDefinition>,
}

impl SchemaRegistry {
    /// The built-in immigration intake tables.
    pub fn standard() -> Self {
        Self {
            document_types: standard_document_types(),
            relationships: standard_relationships(),
            history_types: standard_history_types(),
            person_fields: standard_person_fields(),
        }
    }

    pub fn document_types(&self) -> &[DocumentType] {
        &self.document_types
    }

    pub fn document_type(&self, key: &str) -> Option<&DocumentType> {
        self.document_types.iter().find(|d| d.key == key)
    }

    /// Resolve the effective type: a recognised questionnaire sub-type wins
    /// over the generic questionnaire.
    pub fn resolve(&self, document_type: &str, questionnaire_type: Option<&str>) -> Option<&DocumentType> {
        if document_type == "questionnaire" {
            if let Some(sub) = questionnaire_type.and_then(|q| self.document_type(q)) {
                return Some(sub);
            }
        }
        self.document_type(document_type)
    }

    /// Field list used when the document type could not be identified.
    pub fn generic_fields(&self) -> Vec<FieldDefinition> {
        questionnaire_fields()
    }

    pub fn relationships(&self) -> &[RelationshipType] {
        &self.relationships
    }

    pub fn relationship(&self, key: &str) -> Option<&RelationshipType> {
        self.relationships.iter().find(|r| r.key == key)
    }

    pub fn history_types(&self) -> &[HistoryType] {
        &self.history_types
    }

    pub fn history_type(&self, key: &str) -> Option<&HistoryType> {
        self.history_types.iter().find(|h| h.key == key)
    }

    pub fn person_fields(&self) -> &[FieldDefinition] {
        &self.person_fields
    }

    pub fn person_field(&self, key: &str) -> Option<&FieldDefinition> {
        self.person_fields.iter().find(|f| f.key == key)
    }

    /// Whether values under `key` are dates, in any document type.
    pub fn is_date_key(&self, key: &str) -> bool {
        EXTRA_DATE_KEYS.contains(&key)
            || self
                .document_types
                .iter()
                .flat_map(|d| d.fields.iter())
                .any(|f| f.key == key && f.value_type == ValueType::Date)
    }
}

/// Map a free-form questionnaire title to a known sub-type key.
pub fn detect_questionnaire_type(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    let compact: String = lower.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if compact.contains("589") || lower.contains("asylum") {
        Some("questionnaire_589")
    } else if compact.contains("485") || lower.contains("adjustment") {
        Some("questionnaire_i485")
    } else if compact.contains("n400") || lower.contains("naturalization") {
        Some("questionnaire_n400")
    } else if lower.contains("consult") {
        Some("questionnaire_consult")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biographic_flag_follows_external_field() {
        let registry = SchemaRegistry::standard();
        let q = registry.document_type("questionnaire").unwrap();
        assert!(q.field("a_number").unwrap().biographic);
        assert!(q.field("date_of_birth").unwrap().biographic);
        assert!(!q.field("first_name").unwrap().biographic);
        assert!(!q.field("cell_phone").unwrap().biographic);
    }

    #[test]
    fn test_document_only_fields_are_unmapped() {
        let registry = SchemaRegistry::standard();
        let passport = registry.document_type("passport").unwrap();
        assert!(passport.field("passport_number").unwrap().is_document_only());
        assert_eq!(passport.mapped_fields().count(), 6);
    }

    #[test]
    fn test_resolve_prefers_questionnaire_subtype() {
        let registry = SchemaRegistry::standard();
        let resolved = registry.resolve("questionnaire", Some("questionnaire_n400")).unwrap();
        assert_eq!(resolved.key, "questionnaire_n400");
        assert!(resolved.required.contains(&"green_card_number".to_string()));

        let plain = registry.resolve("questionnaire", Some("nonsense")).unwrap();
        assert_eq!(plain.key, "questionnaire");
        assert!(registry.resolve("unknown", None).is_none());
    }

    #[test]
    fn test_detect_questionnaire_type() {
        assert_eq!(detect_questionnaire_type("I-589 Intake"), Some("questionnaire_589"));
        assert_eq!(detect_questionnaire_type("N-400 Questionnaire"), Some("questionnaire_n400"));
        assert_eq!(detect_questionnaire_type("Consultation Form"), Some("questionnaire_consult"));
        assert_eq!(detect_questionnaire_type("Something else"), None);
    }

    #[test]
    fn test_date_keys() {
        let registry = SchemaRegistry::standard();
        assert!(registry.is_date_key("date_of_birth"));
        assert!(registry.is_date_key("date_of_marriage"));
        assert!(registry.is_date_key("card_expires"));
        assert!(!registry.is_date_key("first_name"));
    }

    #[test]
    fn test_history_types_have_range_keys() {
        let registry = SchemaRegistry::standard();
        for history in registry.history_types() {
            assert!(history.fields.iter().any(|f| f.key == history.start_key));
            assert!(history.fields.iter().any(|f| f.key == history.end_key));
        }
    }
}
