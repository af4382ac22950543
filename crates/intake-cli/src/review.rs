//! Terminal rendering for change sets, validation findings and apply reports.

use colored::Colorize;
use intake_model::{
    ChangeSet, Classification, FamilyAction, HistoryDisposition, SchemaRegistry, Severity,
    ValidationIssue,
};
use intake_reconcile::ApplyReport;
use std::fmt::Write;

fn classification(c: Classification) -> String {
    match c {
        Classification::New => "NEW".green().bold().to_string(),
        Classification::Modified => "MODIFIED".yellow().bold().to_string(),
        Classification::Unchanged => "UNCHANGED".dimmed().to_string(),
        Classification::Removed => "REMOVED".red().to_string(),
    }
}

fn severity(s: Severity) -> String {
    match s {
        Severity::Blocking => s.label().red().bold().to_string(),
        Severity::Advisory => s.label().yellow().to_string(),
        Severity::Informational => s.label().cyan().to_string(),
    }
}

fn percent(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

fn action(a: FamilyAction) -> &'static str {
    match a {
        FamilyAction::Skip => "SKIP",
        FamilyAction::LinkExisting => "LINK_EXISTING",
        FamilyAction::CreateNew => "CREATE_NEW",
        FamilyAction::UpdateLinked => "UPDATE_LINKED",
    }
}

fn disposition(d: HistoryDisposition) -> &'static str {
    match d {
        HistoryDisposition::SaveAsStructuredRecords => "SAVE_AS_STRUCTURED_RECORDS",
        HistoryDisposition::SaveAsNote => "SAVE_AS_NOTE",
        HistoryDisposition::Skip => "SKIP",
    }
}

pub fn render_issues(out: &mut String, issues: &[ValidationIssue]) {
    let mut sorted: Vec<&ValidationIssue> = issues.iter().collect();
    sorted.sort_by_key(|i| i.severity);
    for issue in sorted {
        let _ = write!(out, "  [{}] {}", severity(issue.severity), issue.message);
        if let Some(field) = &issue.field_key {
            let _ = write!(out, " ({})", field.dimmed());
        }
        if let Some(suggested) = &issue.suggested_value {
            let _ = write!(out, " → suggest {}", suggested.bold());
        }
        let _ = writeln!(out, " {}", format!("<{}>", issue.rule).dimmed());
    }
}

pub fn render_change_set(cs: &ChangeSet) -> String {
    let mut out = String::new();
    let p = cs.provenance();
    let _ = writeln!(out, "{} {}", "Change set".bold(), cs.id());
    let _ = writeln!(
        out,
        "  source: {}  type: {}{}  pages: {}  confidence: {}",
        p.source,
        p.document_type,
        p.questionnaire_type
            .as_deref()
            .map(|q| format!(" ({q})"))
            .unwrap_or_default(),
        p.page_count,
        percent(cs.extraction_confidence())
    );

    let record = cs.record();
    match &record.record_id {
        Some(id) => {
            let method = record.match_method.map(|m| m.label()).unwrap_or("?");
            let _ = writeln!(
                out,
                "  record: {} [{}] via {} ({})",
                record.display_name.bold(),
                id,
                method,
                percent(record.match_confidence.unwrap_or(0.0))
            );
            for alt in &record.alternatives {
                let _ = writeln!(out, "    also: {} [{}]", alt.display_name, alt.record_id);
            }
        }
        None => {
            let _ = writeln!(out, "  record: {} {}", "none found".yellow(), record.display_name);
        }
    }
    let _ = writeln!(out, "  review: {:?}", cs.review());

    if !cs.errors().is_empty() {
        let _ = writeln!(out, "\n{}", "Notes".bold());
        for e in cs.errors() {
            let _ = writeln!(out, "  {} {}", "!".red().bold(), e);
        }
    }

    let _ = writeln!(out, "\n{} ({} with changes)", "Fields".bold(), cs.total_changes());
    for c in cs.changes() {
        let mark = if c.is_approved() { "[x]" } else { "[ ]" };
        let _ = write!(
            out,
            "  {} {:<24} {:<10} {} → {}",
            mark,
            c.label(),
            classification(c.classification()),
            c.current_value().unwrap_or("-"),
            c.final_value().bold()
        );
        if c.override_value().is_some() {
            let _ = write!(out, " {}", "(override)".magenta());
        }
        let _ = writeln!(out, "  {}", percent(c.confidence()).dimmed());
    }

    if !cs.family_members().is_empty() {
        let _ = writeln!(out, "\n{}", "Family".bold());
        for (i, fm) in cs.family_members().iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {} ({}) {} {}",
                i,
                fm.display_name().bold(),
                fm.relationship(),
                action(fm.action()).cyan(),
                percent(fm.confidence()).dimmed()
            );
            for m in fm.matches() {
                let selected = fm.selected_match().is_some_and(|s| s.record_id == m.record_id);
                let _ = writeln!(
                    out,
                    "     {} {} [{}] via {} ({})",
                    if selected { "*" } else { " " },
                    m.display_name,
                    m.record_id,
                    m.method.label(),
                    percent(m.confidence)
                );
            }
            for c in fm.field_changes().iter().filter(|c| c.has_change()) {
                let _ = writeln!(
                    out,
                    "     {} {} → {}",
                    c.label(),
                    c.current_value().unwrap_or("-"),
                    c.final_value()
                );
            }
        }
    }

    if !cs.history().is_empty() {
        let _ = writeln!(out, "\n{}", "History".bold());
        for (key, set) in cs.history() {
            let _ = writeln!(out, "  {} ({} entries) {}", key, set.records.len(), disposition(set.disposition).cyan());
        }
    }

    if !cs.other().is_empty() {
        let _ = writeln!(out, "\n{}", "Other (not written)".bold());
        for (key, value) in cs.other() {
            let shown = value.get("value").cloned().unwrap_or_else(|| value.clone());
            let _ = writeln!(out, "  {key}: {shown}");
        }
    }

    if !cs.validation().is_empty() {
        let _ = writeln!(out, "\n{}", "Validation".bold());
        render_issues(&mut out, cs.validation());
    }

    if let Some(m) = cs.metrics() {
        let _ = writeln!(
            out,
            "\n{} iterations={} oracle_calls={} blocking {}→{} low-confidence {}→{} retried={} improved={} family dropped={}",
            "Metrics".bold(),
            m.iterations,
            m.oracle_calls,
            m.blocking_initial,
            m.blocking_final,
            m.low_confidence_initial,
            m.low_confidence_final,
            m.retried_fields,
            m.improved_fields,
            m.family_dropped
        );
    }
    out
}

/// What `apply --confirm` would write.
pub fn render_plan(cs: &ChangeSet) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "Planned writes".bold());
    let approved: Vec<_> = cs.changes().iter().filter(|c| c.is_applicable()).collect();
    if cs.record_id().is_none() && !approved.is_empty() {
        let _ = writeln!(out, "  create record {}", cs.record().display_name.bold());
    }
    for c in &approved {
        let target = if c.is_biographic() { "biographic" } else { "record" };
        let _ = writeln!(
            out,
            "  {} {} = {}",
            target,
            c.external_field().unwrap_or(c.field_key()),
            c.final_value()
        );
    }
    for fm in cs.family_members().iter().filter(|f| f.action() != FamilyAction::Skip) {
        let _ = writeln!(out, "  family {} ({}): {}", fm.display_name(), fm.relationship(), action(fm.action()));
    }
    for (key, set) in cs.history() {
        if set.disposition != HistoryDisposition::Skip && !set.records.is_empty() {
            let _ = writeln!(out, "  history {} ({} entries): {}", key, set.records.len(), disposition(set.disposition));
        }
    }
    out
}

pub fn render_report(report: &ApplyReport) -> String {
    let mut out = String::new();
    for item in &report.created {
        let _ = writeln!(
            out,
            "  {} [{}] {} {} {}",
            "created".green().bold(),
            item.phase.as_str(),
            item.entity,
            item.id.as_deref().unwrap_or(""),
            item.detail.dimmed()
        );
    }
    for item in &report.updated {
        let _ = writeln!(
            out,
            "  {} [{}] {} {} {}",
            "updated".green(),
            item.phase.as_str(),
            item.entity,
            item.id.as_deref().unwrap_or(""),
            item.detail.dimmed()
        );
    }
    for item in &report.skipped {
        let _ = writeln!(out, "  {} [{}] {} {}", "skipped".dimmed(), item.phase.as_str(), item.entity, item.detail.dimmed());
    }
    for w in &report.warnings {
        let _ = writeln!(out, "  {} [{}] {}: {}", "warning".yellow().bold(), w.phase.as_str(), w.entity, w.message);
    }
    for e in &report.errors {
        let _ = writeln!(out, "  {} [{}] {}: {}", "error".red().bold(), e.phase.as_str(), e.entity, e.message);
    }
    let status = if report.success() {
        "ok".green().bold()
    } else {
        "failed".red().bold()
    };
    let _ = writeln!(
        out,
        "{} created={} updated={} skipped={} warnings={} errors={}",
        status,
        report.created.len(),
        report.updated.len(),
        report.skipped.len(),
        report.warnings.len(),
        report.errors.len()
    );
    out
}

pub fn render_types(registry: &SchemaRegistry, with_fields: bool) -> String {
    let mut out = String::new();
    for doc in registry.document_types() {
        let _ = writeln!(out, "{:<24} {}", doc.key.bold(), doc.display_name);
        if !with_fields {
            continue;
        }
        for f in &doc.fields {
            let target = match (&f.external_field, f.biographic) {
                (None, _) => "document only".dimmed().to_string(),
                (Some(ext), true) => format!("biographic.{ext}"),
                (Some(ext), false) => format!("record.{ext}"),
            };
            let required = if doc.required.contains(&f.key) { "*" } else { " " };
            let _ = writeln!(out, "   {required} {:<22} {:<28} {}", f.key, f.label, target);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_model::{DocumentProvenance, FieldChange};

    fn change_set() -> ChangeSet {
        let registry = SchemaRegistry::standard();
        let def = |k: &str| registry.document_type("passport").and_then(|d| d.field(k)).cloned().unwrap();
        let mut builder = ChangeSet::builder(DocumentProvenance {
            source: "scan.png".into(),
            document_type: "passport".into(),
            ..Default::default()
        });
        builder.push_change(FieldChange::diff(&def("first_name"), None, "Maria".into(), 0.9));
        builder.push_change(FieldChange::diff(&def("date_of_birth"), Some("03/12/1985".into()), "1985-03-12".into(), 0.9));
        builder.push_error("Ambiguous match: 2 records");
        builder.build()
    }

    #[test]
    fn test_change_set_rendering() {
        let text = render_change_set(&change_set());
        assert!(text.contains("scan.png"));
        assert!(text.contains("First Name"));
        assert!(text.contains("Ambiguous match: 2 records"));
        assert!(text.contains("1 with changes"));
    }

    #[test]
    fn test_plan_lists_only_applicable() {
        let plan = render_plan(&change_set());
        assert!(plan.contains("FirstName = Maria"));
        assert!(!plan.contains("BirthDate"));
    }

    #[test]
    fn test_types_listing() {
        let text = render_types(&SchemaRegistry::standard(), true);
        assert!(text.contains("questionnaire_589"));
        assert!(text.contains("biographic.AlienNumber"));
    }
}
