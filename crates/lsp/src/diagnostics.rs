//! Diagnostic publisher: converts cached findings into protocol diagnostics
//! and pushes them to the editor whenever a file's findings change.

use scanlight_core::findings::{
    FindingCaches, Issue, SecurityHotspot, Severity, TaintVulnerability, TextRange,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_lsp::Client;
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, NumberOrString, Position, Range, Url,
};

const SOURCE: &str = "scanlight";

fn to_range(range: Option<&TextRange>) -> Range {
    match range {
        Some(r) => Range::new(
            Position::new(r.start_line, r.start_character),
            Position::new(r.end_line, r.end_character),
        ),
        // File-level findings anchor at the top of the document.
        None => Range::new(Position::new(0, 0), Position::new(0, 0)),
    }
}

fn to_severity(severity: Severity) -> DiagnosticSeverity {
    match severity {
        Severity::Blocker | Severity::Critical => DiagnosticSeverity::ERROR,
        Severity::Major => DiagnosticSeverity::WARNING,
        Severity::Minor => DiagnosticSeverity::INFORMATION,
        Severity::Info => DiagnosticSeverity::HINT,
    }
}

fn base_diagnostic(
    range: Range,
    severity: DiagnosticSeverity,
    rule_key: &str,
    message: String,
    finding_id: &str,
    kind: &str,
) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(severity),
        code: Some(NumberOrString::String(rule_key.to_string())),
        source: Some(SOURCE.to_string()),
        message,
        // The stable identity rides along so code actions can find the
        // finding again.
        data: Some(serde_json::json!({ "id": finding_id, "kind": kind })),
        ..Default::default()
    }
}

pub fn issue_to_diagnostic(issue: &Issue) -> Diagnostic {
    base_diagnostic(
        to_range(issue.range.as_ref()),
        to_severity(issue.severity),
        &issue.rule_key,
        issue.message.clone(),
        issue.id.as_str(),
        "issue",
    )
}

pub fn hotspot_to_diagnostic(hotspot: &SecurityHotspot) -> Diagnostic {
    base_diagnostic(
        to_range(Some(&hotspot.range)),
        DiagnosticSeverity::WARNING,
        &hotspot.rule_key,
        format!("Security hotspot: {}", hotspot.message),
        hotspot.id.as_str(),
        "hotspot",
    )
}

pub fn taint_to_diagnostic(taint: &TaintVulnerability) -> Diagnostic {
    base_diagnostic(
        to_range(Some(&taint.range)),
        to_severity(taint.severity),
        &taint.rule_key,
        taint.message.clone(),
        taint.id.as_str(),
        "taint",
    )
}

/// Everything currently cached for `uri`, as one diagnostic per finding.
pub fn diagnostics_for(caches: &FindingCaches, uri: &Url) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    diagnostics.extend(caches.issues.issues_for(uri).values().map(issue_to_diagnostic));
    diagnostics.extend(
        caches
            .hotspots
            .hotspots_for(uri)
            .values()
            .map(hotspot_to_diagnostic),
    );
    diagnostics.extend(
        caches
            .taint
            .vulnerabilities_for(uri)
            .values()
            .map(taint_to_diagnostic),
    );
    diagnostics
}

/// Forwards cache updates to the editor until the token is cancelled.
pub fn spawn_publisher(client: Client, caches: Arc<FindingCaches>, cancel_token: CancellationToken) {
    let mut updates = caches.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                changed = updates.recv() => match changed {
                    Ok(uri) => {
                        // Each event re-reads the caches, so a burst of
                        // updates collapses into publishing the final state.
                        let diagnostics = diagnostics_for(&caches, &uri);
                        client.publish_diagnostics(uri, diagnostics, None).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("Diagnostic publisher lagged, skipped {} updates", missed);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}
