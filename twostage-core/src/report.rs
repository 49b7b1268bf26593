//! Per-cycle progress reports.

use crate::error::TrainError;
use crate::eval::runner::EvaluationSummary;
use crate::persistence;
use crate::training::mode::TrainingMode;
use crate::training::stats::{ConfusionAccumulator, TrainingStats};
use handlebars::Handlebars;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Plot images a [`ProgressPlotter`] renders next to the report.
pub const PROPOSAL_LOSS_PLOT: &str = "proposal_losses.png";
pub const DETECTION_LOSS_PLOT: &str = "detection_losses.png";

/// Draws the loss histories before each report is written.
pub trait ProgressPlotter {
    /// Write [`PROPOSAL_LOSS_PLOT`] and [`DETECTION_LOSS_PLOT`] under `out_dir`.
    fn plot(&mut self, stats: &TrainingStats, out_dir: &Path) -> Result<(), TrainError>;
}

/// Everything known at the end of one reporting cycle.
#[derive(Debug, Clone, Copy)]
pub struct ReportCycle<'a> {
    pub experiment: &'a str,
    pub iteration: usize,
    pub mode: TrainingMode,
    pub summary: &'a EvaluationSummary,
    pub stats: &'a TrainingStats,
    pub proposal_confusion: &'a ConfusionAccumulator,
    pub classification_confusion: &'a ConfusionAccumulator,
}

pub trait Reporter {
    fn report(&mut self, cycle: &ReportCycle<'_>) -> Result<(), TrainError>;
}

const REPORT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{experiment}} @ {{iteration}}</title>
</head>
<body>
<h1>{{experiment}}</h1>
<p>Iteration {{iteration}}, mode {{mode}}, mAP {{map}}%</p>
<h2>Losses</h2>
<img src="{{proposal_plot}}" alt="proposal losses">
<img src="{{detection_plot}}" alt="detection losses">
{{#if last_losses}}
<table>
<tr><th>pnet cls</th><th>pnet reg</th><th>cnet cls</th><th>cnet reg</th></tr>
<tr>
<td>{{last_losses.pnet_cls}}</td><td>{{last_losses.pnet_reg}}</td>
<td>{{last_losses.cnet_cls}}</td><td>{{last_losses.cnet_reg}}</td>
</tr>
</table>
{{/if}}
<h2>Confusion</h2>
<h3>Proposals ({{proposal_accuracy}}%)</h3>
<pre>{{proposal_confusion}}</pre>
<h3>Classification ({{classification_accuracy}}%)</h3>
<pre>{{classification_confusion}}</pre>
{{#if detections}}
<h2>Detections</h2>
{{#each detections}}
<img src="{{this}}" alt="detections">
{{/each}}
{{/if}}
</body>
</html>
"#;

/// Renders `<dir>/<experiment>_report.html`, overwritten every cycle.
pub struct HtmlReporter {
    dir: PathBuf,
    handlebars: Handlebars<'static>,
}

impl HtmlReporter {
    pub fn new(dir: PathBuf) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        Self { dir, handlebars }
    }

    pub fn path_for(&self, experiment: &str) -> PathBuf {
        self.dir.join(format!("{experiment}_report.html"))
    }

    pub fn render(&self, cycle: &ReportCycle<'_>) -> Result<String, TrainError> {
        let detections: Vec<String> = cycle
            .summary
            .annotated
            .iter()
            .map(|p| relative_to(&self.dir, p))
            .collect();
        let data = json!({
            "experiment": cycle.experiment,
            "iteration": cycle.iteration,
            "mode": cycle.mode.as_str(),
            "map": format!("{:.2}", cycle.summary.map_percent),
            "proposal_plot": PROPOSAL_LOSS_PLOT,
            "detection_plot": DETECTION_LOSS_PLOT,
            "last_losses": cycle.stats.last(),
            "proposal_accuracy": format!("{:.2}", cycle.proposal_confusion.accuracy() * 100.0),
            "proposal_confusion": cycle.proposal_confusion.render(),
            "classification_accuracy":
                format!("{:.2}", cycle.classification_confusion.accuracy() * 100.0),
            "classification_confusion": cycle.classification_confusion.render(),
            "detections": detections,
        });
        self.handlebars
            .render_template(REPORT_TEMPLATE, &data)
            .map_err(|e| TrainError::report(format!("failed to render report: {e}")))
    }
}

impl Reporter for HtmlReporter {
    fn report(&mut self, cycle: &ReportCycle<'_>) -> Result<(), TrainError> {
        let html = self.render(cycle)?;
        let path = self.path_for(cycle.experiment);
        persistence::write_atomic(&path, html.as_bytes())
            .map_err(|e| TrainError::report(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "Report written");
        Ok(())
    }
}

fn relative_to(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::curve::PrecisionRecallCurve;
    use crate::training::stats::LossBreakdown;
    use tempfile::TempDir;

    fn summary(annotated: Vec<PathBuf>) -> EvaluationSummary {
        EvaluationSummary {
            mode: TrainingMode::Both,
            sample_ids: vec!["a".into()],
            results: vec![],
            curve: PrecisionRecallCurve::default(),
            eleven_point_ap: Some(0.5),
            voc_ap: Some(0.4242),
            map_percent: 42.42,
            annotated,
        }
    }

    #[test]
    fn test_report_written_atomically() {
        let dir = TempDir::new().unwrap();
        let mut stats = TrainingStats::new();
        stats.record(&LossBreakdown {
            pnet_cls: 0.75,
            ..Default::default()
        });
        let mut proposals = ConfusionAccumulator::new(2);
        proposals.add(1, 1).unwrap();
        let classes = ConfusionAccumulator::new(3);
        let summary = summary(vec![dir.path().join("detections/a.png")]);

        let mut reporter = HtmlReporter::new(dir.path().to_path_buf());
        reporter
            .report(&ReportCycle {
                experiment: "voc",
                iteration: 250,
                mode: TrainingMode::Both,
                summary: &summary,
                stats: &stats,
                proposal_confusion: &proposals,
                classification_confusion: &classes,
            })
            .unwrap();

        let html = std::fs::read_to_string(dir.path().join("voc_report.html")).unwrap();
        assert!(html.contains("Iteration 250, mode both, mAP 42.42%"));
        assert!(html.contains("proposal_losses.png"));
        assert!(html.contains("<td>0.75</td>"));
        assert!(html.contains("Proposals (100.00%)"));
        assert!(html.contains(r#"<img src="detections/a.png""#));
        assert!(!dir.path().join("voc_report.html.partial").exists());
    }

    #[test]
    fn test_unwritable_dir_is_report_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let stats = TrainingStats::new();
        let confusion = ConfusionAccumulator::new(2);
        let summary = summary(vec![]);

        let mut reporter = HtmlReporter::new(blocker.join("nested"));
        let err = reporter
            .report(&ReportCycle {
                experiment: "voc",
                iteration: 1,
                mode: TrainingMode::OnlyPnet,
                summary: &summary,
                stats: &stats,
                proposal_confusion: &confusion,
                classification_confusion: &confusion,
            })
            .unwrap_err();
        assert!(matches!(err, TrainError::Report(_)));
    }
}
