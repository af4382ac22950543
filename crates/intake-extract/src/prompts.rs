//! Prompt templates for every oracle call the pipeline makes.

use intake_model::{DocumentType, Extraction, ExtractedField, FamilyExtraction, FieldDefinition, SchemaRegistry, Severity, ValidationReport};

/// Attributes the family verification pass asks to backfill.
pub const FAMILY_BACKFILL_KEYS: &[&str] = &["date_of_birth", "country_of_birth", "a_number", "citizenship"];

/// Issues of each severity fed back by one refinement pass.
const REFINE_ISSUES_PER_SEVERITY: usize = 5;

pub fn detection(types: &[DocumentType]) -> String {
    let type_list: Vec<String> = types
        .iter()
        .map(|t| format!("- {}: {}", t.key, t.display_name))
        .collect();
    format!(
        r#"Analyze this document and identify its type.

Known document types:
{}

Respond in JSON: {{"document_type": "type_key", "questionnaire_name": "name if visible"}}
"#,
        type_list.join("\n")
    )
}

/// What an extraction prompt is about: the document and its field list.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionTarget<'a> {
    pub display_name: &'a str,
    pub fields: &'a [FieldDefinition],
    pub registry: &'a SchemaRegistry,
}

pub fn base_extraction(target: &ExtractionTarget<'_>, instructions: &str) -> String {
    let field_list = if target.fields.is_empty() {
        "- Extract all visible personal information".to_string()
    } else {
        target
            .fields
            .iter()
            .map(|f| format!("- {}: {}", f.key, f.label))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let relationships = target
        .registry
        .relationships()
        .iter()
        .map(|r| r.key.as_str())
        .collect::<Vec<_>>()
        .join("|");
    let history = target
        .registry
        .history_types()
        .iter()
        .map(|h| format!("        \"{}\": [{{\"data\": {{...}}, \"is_current\": true, \"confidence\": 0.9}}]", h.key))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        r#"Extract all information from this {display}.
{instructions}

PRIMARY FIELDS TO EXTRACT:
{field_list}

IMPORTANT RULES:
- Extract exactly what is written, do not infer
- For handwritten text, indicate confidence (0.0-1.0)
- Dates: use YYYY-MM-DD format
- A-Numbers: include all 9 digits
- If a field is empty/not visible, omit it

Respond in JSON:
{{
    "confidence": 0.0-1.0,
    "fields": {{
        "field_key": {{"value": "...", "confidence": 0.0-1.0}},
        ...
    }},
    "family_members": [
        {{"relationship": "{relationships}", "data": {{...}}, "confidence": 0.9}},
        ...
    ],
    "history": {{
{history}
    }},
    "other": {{}}
}}
"#,
        display = target.display_name,
    )
}

pub fn critique(extraction: &Extraction) -> String {
    let fields = serde_json::to_string_pretty(&extraction.fields).unwrap_or_else(|_| "{}".to_string());
    let family = serde_json::to_string_pretty(&extraction.family_members).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"I extracted this data from the document. Please review it for errors.

EXTRACTED FIELDS:
{fields}

EXTRACTED FAMILY MEMBERS:
{family}

CHECK FOR THESE COMMON ERRORS:
1. SWAPPED VALUES: First/last name swapped, dates in wrong fields
2. FORMAT ERRORS: Dates not in YYYY-MM-DD, A-numbers missing digits
3. OCR ERRORS: Numbers misread (0 vs O, 1 vs I, 8 vs B)
4. MISSING DATA: Fields visible in document but not extracted
5. CONFIDENCE TOO HIGH: Handwritten/unclear text marked as high confidence
6. LOGICAL ERRORS: DOB after entry date, impossible dates

Look at the ORIGINAL DOCUMENT again and compare with my extraction.

Respond with CORRECTED JSON (same format). Include a "corrections" array listing what you fixed:
{{
    "confidence": 0.0-1.0,
    "fields": {{...}},
    "family_members": [...],
    "history": {{...}},
    "corrections": [
        {{"field": "field_name", "old": "old_value", "new": "new_value", "reason": "why"}}
    ]
}}

If no corrections needed, return the same data with empty corrections array.
"#
    )
}

pub fn retry(fields: &[(&str, &ExtractedField)]) -> String {
    let listing: Vec<String> = fields
        .iter()
        .map(|(key, field)| {
            format!(
                "- {key}: currently \"{}\" (confidence: {:.0}%)",
                field.value,
                field.confidence * 100.0
            )
        })
        .collect();
    format!(
        r#"I need you to look MORE CAREFULLY at these specific fields that were unclear:

FIELDS TO RE-EXAMINE:
{}

Look at the document again. These fields exist but were hard to read.
Try different interpretations. Consider:
- Could characters be misread? (0/O, 1/I, 8/B, 5/S)
- Is there faded or handwritten text?
- Could the value be in a different location?

Return ONLY the re-examined fields in JSON:
{{
    "fields": {{
        "field_key": {{"value": "corrected_value", "confidence": 0.0-1.0}},
        ...
    }}
}}
"#,
        listing.join("\n")
    )
}

pub fn verify_family(members: &[FamilyExtraction]) -> String {
    let summary: Vec<String> = members
        .iter()
        .enumerate()
        .map(|(i, fm)| {
            format!(
                "{}. {}: {} {}",
                i + 1,
                fm.relationship,
                fm.attr("first_name").unwrap_or("?"),
                fm.attr("last_name").unwrap_or("?")
            )
        })
        .collect();
    format!(
        r#"I found these family members in the document:

{}

Please VERIFY each one by re-reading the family member sections.

For each family member:
1. Confirm they actually exist in the document (not a misread)
2. Extract any MISSING fields: {}
3. If a person doesn't actually exist, mark them as "NOT_FOUND"

Return verified family members in JSON, keeping the numbers above as "index":
{{
    "family_members": [
        {{
            "index": 1,
            "relationship": "spouse|child|parent",
            "verified": true,
            "data": {{
                "first_name": "...",
                "last_name": "...",
                "date_of_birth": "YYYY-MM-DD",
                "country_of_birth": "...",
                "citizenship": "...",
                "a_number": "..."
            }},
            "confidence": 0.0-1.0
        }}
    ]
}}

Mark "verified": false and include reason if person NOT_FOUND.
"#,
        summary.join("\n"),
        FAMILY_BACKFILL_KEYS.join(", ")
    )
}

/// `None` when there is nothing to feed back.
pub fn refine(report: &ValidationReport) -> Option<String> {
    let line = |issue: &intake_model::ValidationIssue| {
        format!("- {}: {}", issue.field_key.as_deref().unwrap_or("general"), issue.message)
    };
    let lines: Vec<String> = report
        .with_severity(Severity::Blocking)
        .take(REFINE_ISSUES_PER_SEVERITY)
        .chain(report.with_severity(Severity::Advisory).take(REFINE_ISSUES_PER_SEVERITY))
        .map(line)
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!(
        r#"My extraction has these validation errors:

{}

Look at the document again and fix these specific issues.
Return the CORRECTED data in the same JSON format.

Only return the fields that need correction:
{{
    "fields": {{
        "field_key": {{"value": "corrected", "confidence": 0.0-1.0}},
        ...
    }}
}}
"#,
        lines.join("\n")
    ))
}
