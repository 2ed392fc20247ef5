//! SPDX-License-Identifier: GPL-3.0-or-later

use handsteer_protocol::{Report, Telemetry};
use log::{debug, info, warn};
use std::io;
use std::sync::Arc;

pub const FALLBACK_ARCHETYPE: &str = "DATA FRAGMENTED";
pub const FALLBACK_MATCH: &str = "Unknown Entity";
pub const FALLBACK_NARRATIVE: &str =
    "The signal was lost before the archive could be read. Your career remains unwritten.";

/// External text-generation service. Given a prompt, returns text or fails.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> io::Result<String>;
}

pub fn fallback_report() -> Report {
    Report {
        archetype: FALLBACK_ARCHETYPE.to_string(),
        r#match: FALLBACK_MATCH.to_string(),
        narrative: FALLBACK_NARRATIVE.to_string(),
    }
}

pub fn build_prompt(telemetry: &Telemetry) -> String {
    let m = &telemetry.metrics;
    let a = &telemetry.artifacts;
    let timeline: Vec<&str> = telemetry.timeline.iter().map(|e| e.event.as_str()).collect();

    format!(
        "You are an art-world historian analyzing the career of an artist from game telemetry.\n\
         Institutional support: {}%\n\
         Network reach: {}%\n\
         Academic standing: {}%\n\
         Historical weight: {}%\n\
         Discourse presence: {}%\n\
         Career timeline: {:?}\n\
         Artifacts collected: {} minor, {} major, {} canonical\n\
         Classify the career. Respond with a JSON object with exactly three string fields: \
         \"archetype\" (a short uppercase title), \"match\" (the real artist whose career is \
         closest) and \"narrative\" (two or three sentences).",
        m.inst, m.net, m.acad, m.hist, m.disc, timeline, a.t1, a.t2, a.t3
    )
}

/// Parses the service's answer. A JSON object wrapped in a markdown code fence is accepted.
pub fn parse_report(text: &str) -> io::Result<Report> {
    let body = strip_code_fence(text);
    let report: Report = serde_json::from_str(body)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if !report.is_complete() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "report has empty fields",
        ));
    }
    Ok(report)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub struct ReportRequester {
    generator: Arc<dyn TextGenerator>,
}

impl ReportRequester {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Always yields a renderable report.
    pub fn generate_report(&self, telemetry: &Telemetry) -> Report {
        let prompt = build_prompt(telemetry);
        debug!("Report prompt: {prompt}");

        let result = self
            .generator
            .generate(&prompt)
            .and_then(|text| parse_report(&text));

        match result {
            Ok(report) => {
                info!("Report generated: {} / {}", report.archetype, report.r#match);
                report
            }
            Err(e) => {
                warn!("Report generation failed, using fallback: {e}");
                fallback_report()
            }
        }
    }
}
