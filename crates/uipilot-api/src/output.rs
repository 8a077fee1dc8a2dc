//! Human-readable rendering of execution results.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use uipilot_types::result::{ExecutionResult, StepStatus};

/// Print a styled run summary: headline, per-phase table, step counts, and
/// any recorded errors.
pub fn render_result(result: &ExecutionResult) {
    let headline = if result.overall_success {
        style("PASSED").green().bold()
    } else {
        style("FAILED").red().bold()
    };
    println!(
        "{headline} {} ({} ms, run {})",
        result.workflow_name, result.duration_ms, result.run_id
    );

    if !result.phase_results.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Phase", "Result", "Duration", "Executed steps"]);
        for phase in &result.phase_results {
            let outcome = if phase.success {
                Cell::new("ok").fg(Color::Green)
            } else {
                Cell::new("failed").fg(Color::Red)
            };
            table.add_row(vec![
                Cell::new(&phase.name),
                outcome,
                Cell::new(format!("{} ms", phase.duration_ms)),
                Cell::new(phase.executed_steps.join(", ")),
            ]);
        }
        println!("{table}");
    }

    println!(
        "steps: {} ok, {} failed, {} skipped",
        result.count(StepStatus::Success),
        result.count(StepStatus::Failed),
        result.count(StepStatus::Skipped),
    );

    if !result.error_history.is_empty() {
        println!("{}", style("errors:").red().bold());
        for err in &result.error_history {
            println!("  [{}] {}: {}", err.phase, err.step, err.error);
        }
    }

    if !result.success_criteria.is_empty() {
        println!("{}", style("success criteria (not evaluated):").dim());
        for criterion in &result.success_criteria {
            println!("  - {criterion}");
        }
    }
}
