//! Human-readable renderings of a report

use std::fmt::Write;

use super::schema::{AnalysisReport, RunStatus};

fn push_list(out: &mut String, title: &str, items: &[String]) {
    let _ = writeln!(out, "### {} ({})\n", title, items.len());
    if items.is_empty() {
        out.push_str("_None._\n\n");
        return;
    }
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
    out.push('\n');
}

/// Full per-run document (`analysis.md`)
pub fn render_analysis(report: &AnalysisReport) -> String {
    let meta = &report.metadata;
    let mut out = String::new();

    let _ = writeln!(out, "# Code analysis: {}\n", meta.project_name);
    let _ = writeln!(out, "| | |\n|---|---|");
    let _ = writeln!(out, "| Run | `{}` |", meta.run_id);
    let _ = writeln!(out, "| Time | {} |", meta.timestamp.to_rfc3339());
    let _ = writeln!(out, "| Analysis type | {} ({}) |", meta.analysis_type, meta.classification);
    let _ = writeln!(out, "| Mode | {} |", meta.extract_mode.as_str());
    let status = match meta.status {
        RunStatus::Completed => "completed",
        RunStatus::Failed => "**failed**",
    };
    let _ = writeln!(out, "| Status | {} |", status);
    if let Some(lang) = &report.project_context.primary_language {
        let _ = writeln!(out, "| Primary language | {} |", lang);
    }
    if let Some(framework) = &report.project_context.framework {
        let _ = writeln!(out, "| Framework | {} |", framework);
    }
    out.push('\n');

    if let Some(error) = &meta.error {
        let _ = writeln!(out, "> Analysis failed: {}\n", error);
    }

    let m = &report.code_metrics;
    out.push_str("## Change metrics\n\n");
    let _ = writeln!(
        out,
        "- Files changed: {} ({} new, {} flattened)",
        m.files_changed, m.files_added, m.files_flattened
    );
    let _ = writeln!(out, "- Code blocks: {}", m.blocks_total);
    for (kind, count) in &m.blocks_by_kind {
        let _ = writeln!(out, "  - {}: {}", kind, count);
    }
    let languages: Vec<String> = m
        .blocks_by_language
        .iter()
        .map(|(l, c)| format!("{} ({})", l, c))
        .collect();
    if !languages.is_empty() {
        let _ = writeln!(out, "- Languages: {}", languages.join(", "));
    }
    let _ = writeln!(
        out,
        "- Bundle: {} characters{}",
        m.bundle_chars,
        if m.bundle_truncated { " (truncated)" } else { "" }
    );
    out.push('\n');

    let f = &report.ai_analysis.structured_findings;
    out.push_str("## Findings\n\n");
    if !f.executive_summary.is_empty() {
        let _ = writeln!(out, "{}\n", f.executive_summary);
    }
    push_list(&mut out, "Critical issues", &f.critical_issues);
    push_list(&mut out, "High priority", &f.high_priority);
    push_list(&mut out, "Medium priority", &f.medium_priority);
    push_list(&mut out, "Low priority", &f.low_priority);
    push_list(&mut out, "Recommendations", &f.recommendations);

    let s = &report.semantic_analysis;
    out.push_str("## Semantic context\n\n");
    if !s.enabled {
        out.push_str("Semantic search was skipped for this run.\n\n");
    } else {
        let _ = writeln!(
            out,
            "Backend `{}`: searched {} indexed blocks, {} above threshold, {} reported.\n",
            s.backend_identity, s.searched_blocks, s.passed_threshold, s.similar_blocks_found
        );
        if s.has_similar_code {
            let _ = writeln!(out, "{}", s.context_text);
        }
    }

    if let Some(raw) = &report.ai_analysis.raw_text {
        out.push_str("## Raw model output\n\n<details>\n<summary>Show</summary>\n\n");
        out.push_str(raw.trim_end());
        out.push_str("\n\n</details>\n");
    }

    out
}

/// Short, stable overview regenerated each run (`REVIEW_SUMMARY.md`)
pub fn render_summary(report: &AnalysisReport) -> String {
    let meta = &report.metadata;
    let f = &report.ai_analysis.structured_findings;
    let counts = f.counts();
    let mut out = String::new();

    let _ = writeln!(out, "# Review summary: {}\n", meta.project_name);
    let _ = writeln!(
        out,
        "Last analysis: {} ({} analysis, run `{}`)\n",
        meta.timestamp.format("%Y-%m-%d %H:%M UTC"),
        meta.analysis_type,
        meta.run_id
    );

    if let Some(error) = &meta.error {
        let _ = writeln!(out, "**The last run failed:** {}\n", error);
    }

    out.push_str("| Severity | Count |\n|---|---|\n");
    let _ = writeln!(out, "| Critical | {} |", counts.critical);
    let _ = writeln!(out, "| High | {} |", counts.high);
    let _ = writeln!(out, "| Medium | {} |", counts.medium);
    let _ = writeln!(out, "| Low | {} |", counts.low);
    let _ = writeln!(out, "| Recommendations | {} |\n", f.recommendations.len());

    let urgent: Vec<&String> = f.critical_issues.iter().chain(&f.high_priority).collect();
    if !urgent.is_empty() {
        out.push_str("## Needs attention\n\n");
        for item in urgent {
            let _ = writeln!(out, "- {}", item);
        }
        out.push('\n');
    }

    if !f.executive_summary.is_empty() {
        let _ = writeln!(out, "## Summary\n\n{}\n", f.executive_summary);
    }

    out.push_str("Full details: [analysis.md](analysis.md) · [analysis.json](analysis.json)\n");
    out
}
