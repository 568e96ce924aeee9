// SPDX-License-Identifier: MIT

//! Markdown rendering and persistence of a finished run

use super::report::Report;
use super::{read_field, REPORT};
use crate::adk::error::CapabilityError;
use crate::adk::store::DocumentStore;
use crate::refinery::state::WorkflowState;
use chrono::Utc;
use std::fmt::Write;

const MAX_SLUG_CHARS: usize = 50;

/// File-name friendly form of the query
pub fn slugify(query: &str) -> String {
    let mut slug = String::new();
    for c in query.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
        if slug.len() >= MAX_SLUG_CHARS {
            break;
        }
    }
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "report".to_string()
    } else {
        slug.to_string()
    }
}

/// Render the run's report, diagnostics and usage as markdown
pub fn render_markdown(state: &WorkflowState) -> String {
    let report: Report = read_field(state, REPORT);
    let title = if report.title.is_empty() {
        format!("Research Report: {}", state.query())
    } else {
        report.title.clone()
    };

    // Writing to a String cannot fail
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", title);
    let _ = writeln!(out, "**Query:** {}  ", state.query());
    let _ = writeln!(
        out,
        "**Quality score:** {:.0}/100 | **Refinement passes:** {} | **Outcome:** {:?}",
        state.score(),
        state.iteration(),
        state.phase()
    );
    if let Some(at) = report.generated_at {
        let _ = writeln!(out, "**Generated:** {}", at.format("%Y-%m-%d %H:%M UTC"));
    }

    section(&mut out, "Executive Summary", &report.executive_summary);

    if !report.key_findings.is_empty() {
        let _ = writeln!(out, "\n## Key Findings\n");
        for (i, f) in report.key_findings.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. {} *(confidence {:.0}%, {} sources)*",
                i + 1,
                f.finding,
                f.confidence,
                f.sources_count
            );
        }
    }

    section(&mut out, "Contradictions & Gaps", &report.contradictions_and_gaps);
    section(&mut out, "Insights & Trends", &report.insights_and_trends);
    section(&mut out, "Source Reliability", &report.source_reliability);

    if !report.sources_cited.is_empty() {
        let _ = writeln!(out, "\n## Sources\n");
        for (i, s) in report.sources_cited.iter().enumerate() {
            let _ = writeln!(out, "{}. [{}]({})", i + 1, s.title, s.url);
        }
    }

    if !report.follow_up_queries.is_empty() {
        let _ = writeln!(out, "\n## Suggested Follow-up\n");
        for q in &report.follow_up_queries {
            let _ = writeln!(out, "- {}", q);
        }
    }

    section(&mut out, "Methodology", &report.methodology_note);

    if !state.errors().is_empty() {
        let _ = writeln!(out, "\n## Diagnostics\n");
        for e in state.errors() {
            let _ = writeln!(out, "- {}", e);
        }
    }

    let usage = state.usage();
    if usage.stages().next().is_some() {
        let _ = writeln!(out, "\n## Usage\n");
        let _ = writeln!(out, "| Stage | LLM calls | Tokens | Searches |");
        let _ = writeln!(out, "|---|---|---|---|");
        for (stage, u) in usage.stages() {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                stage,
                u.llm_calls,
                u.total_tokens(),
                u.search_calls
            );
        }
        let _ = writeln!(
            out,
            "| **total** | {} | {} | {} |",
            usage.total_llm_calls(),
            usage.total_tokens(),
            usage.total_search_calls()
        );
    }

    out
}

fn section(out: &mut String, heading: &str, body: &str) {
    if !body.trim().is_empty() {
        let _ = writeln!(out, "\n## {}\n\n{}", heading, body.trim());
    }
}

/// Save the markdown report and return its location
pub async fn export_report(
    store: &dyn DocumentStore,
    state: &WorkflowState,
) -> Result<String, CapabilityError> {
    let name = format!(
        "research_{}_{}.md",
        slugify(state.query()),
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    let location = store.save(render_markdown(state).as_bytes(), &name).await?;
    log::info!("Report exported to {}", location);
    Ok(location)
}
