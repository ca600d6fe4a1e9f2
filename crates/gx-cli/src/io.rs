//! Dataset CSV reading and results CSV writing.

use anyhow::{Context, Result};
use gx_compute::RegulationModel;
use gx_core::ExpressionDataset;
use crate::config::TaskSpec;
use gx_inference::{InferenceResult, ResultsWriter};
use std::io::Write;
use std::path::Path;

/// Read an expression table: header `gene,<t0>,<t1>,...`, one gene per row.
pub fn read_dataset(path: &Path) -> Result<ExpressionDataset> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = rdr.headers().context("failed to read CSV headers")?.clone();
    if headers.len() < 2 {
        anyhow::bail!("{}: expected a gene column followed by time columns", path.display());
    }
    let times = headers
        .iter()
        .skip(1)
        .map(|h| h.parse::<f64>().with_context(|| format!("time column '{h}' is not a number")))
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.context("failed to read CSV row")?;
        let name = record.get(0).unwrap_or_default().to_string();
        let values = record
            .iter()
            .skip(1)
            .map(|v| {
                v.parse::<f64>()
                    .with_context(|| format!("row {} ({name}): '{v}' is not a number", line + 1))
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push((name, values));
    }

    let dataset = ExpressionDataset::new(times, rows)
        .with_context(|| format!("invalid dataset {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        genes = dataset.n_genes(),
        times = dataset.n_times(),
        "dataset loaded"
    );
    Ok(dataset)
}

/// Write results as CSV to `output`, or stdout when `None`. Unresolved
/// pairings follow the fitted rows.
pub fn write_results(
    output: Option<&Path>,
    dataset: &ExpressionDataset,
    model: RegulationModel,
    results: &[InferenceResult],
    unresolved: &[(u64, TaskSpec)],
) -> Result<()> {
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_table(file, dataset, model, results, unresolved)?;
            eprintln!("Wrote {}", path.display());
        }
        None => write_table(std::io::stdout().lock(), dataset, model, results, unresolved)?,
    }
    Ok(())
}

fn write_table<W: Write>(
    writer: W,
    dataset: &ExpressionDataset,
    model: RegulationModel,
    results: &[InferenceResult],
    unresolved: &[(u64, TaskSpec)],
) -> Result<()> {
    let mut wtr = ResultsWriter::new(writer, model)?;
    wtr.write_all(dataset, results)?;
    for (id, t) in unresolved {
        wtr.write_unresolved(&t.target, &t.regulators)
            .with_context(|| format!("task {id}: cannot write unresolved row"))?;
    }
    wtr.into_inner()?;
    Ok(())
}
