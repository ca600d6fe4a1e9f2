//! Tabular export of inference results.
//!
//! Column layout for the additive model:
//!
//! ```text
//! target,reg1,...,regN,w1,...,wN[,constitutive],cost,iterations,status
//! ```
//!
//! With a single regulator the gene column is `reg` and the weight column `w`.
//! Pairings that never became tasks keep their raw names, leave the numeric
//! cells empty and carry the status `unresolved`.

use crate::task::InferenceResult;
use gx_compute::{ModelKind, RegulationModel};
use gx_core::{Error, ExpressionDataset, Result};
use std::io::Write;

/// Gene-name columns of the additive model: `target,reg` or `target,reg1..regN`.
pub fn additive_header(n_regulators: usize) -> Vec<String> {
    let mut header = vec!["target".to_string()];
    if n_regulators == 1 {
        header.push("reg".to_string());
    } else {
        header.extend((1..=n_regulators).map(|i| format!("reg{i}")));
    }
    header
}

/// Gene-name columns for any model kind.
pub fn specific_header(model: &RegulationModel) -> Vec<String> {
    match model.kind {
        ModelKind::Additive => additive_header(model.n_regulators),
    }
}

/// Full header: gene columns, parameter columns, then fit metadata.
pub fn results_header(model: &RegulationModel) -> Vec<String> {
    let mut header = specific_header(model);
    header.extend(model.parameter_names());
    header.extend(["cost", "iterations", "status"].map(String::from));
    header
}

/// Status cell of a row written by [`ResultsWriter::write_unresolved`].
pub const UNRESOLVED_STATUS: &str = "unresolved";

/// CSV writer for results sharing one model shape.
pub struct ResultsWriter<W: Write> {
    wtr: csv::Writer<W>,
    model: RegulationModel,
    rows: usize,
}

impl<W: Write> ResultsWriter<W> {
    /// Start a table for `model`, writing the header immediately.
    pub fn new(writer: W, model: RegulationModel) -> Result<Self> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(results_header(&model)).map_err(std::io::Error::from)?;
        Ok(Self { wtr, model, rows: 0 })
    }

    /// Rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Append one result, naming genes from `dataset`.
    pub fn write(&mut self, dataset: &ExpressionDataset, result: &InferenceResult) -> Result<()> {
        if result.model != self.model {
            return Err(Error::Validation(format!(
                "task {}: model {:?} does not match table model {:?}",
                result.task_id, result.model, self.model
            )));
        }
        let name = |g| {
            dataset.gene_name(g).map(str::to_string).ok_or_else(|| {
                Error::Validation(format!("task {}: unknown gene {g}", result.task_id))
            })
        };

        let mut record = Vec::with_capacity(results_header(&self.model).len());
        record.push(name(result.target)?);
        for &g in &result.regulators {
            record.push(name(g)?);
        }
        record.extend(result.params.iter().map(|p| p.to_string()));
        record.push(result.cost.to_string());
        record.push(result.iterations.to_string());
        record.push(result.status.label().to_string());

        self.wtr.write_record(&record).map_err(std::io::Error::from)?;
        self.rows += 1;
        Ok(())
    }

    /// Append a row for a pairing whose gene names did not resolve, echoing the
    /// names as given.
    pub fn write_unresolved(&mut self, target: &str, regulators: &[String]) -> Result<()> {
        if regulators.len() != self.model.n_regulators {
            return Err(Error::Validation(format!(
                "unresolved pairing for '{target}' lists {} regulators, table expects {}",
                regulators.len(),
                self.model.n_regulators
            )));
        }
        let mut record = Vec::with_capacity(results_header(&self.model).len());
        record.push(target.to_string());
        record.extend(regulators.iter().cloned());
        record.extend(std::iter::repeat_n(String::new(), self.model.n_params() + 2));
        record.push(UNRESOLVED_STATUS.to_string());

        self.wtr.write_record(&record).map_err(std::io::Error::from)?;
        self.rows += 1;
        Ok(())
    }

    /// Append every result in order.
    pub fn write_all(
        &mut self,
        dataset: &ExpressionDataset,
        results: &[InferenceResult],
    ) -> Result<()> {
        for r in results {
            self.write(dataset, r)?;
        }
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.wtr.into_inner().map_err(|e| {
            let err = e.error();
            Error::Io(std::io::Error::new(err.kind(), err.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FitStatus;
    use gx_core::{GeneId, TaskId};

    #[test]
    fn header_layout_follows_regulator_count() {
        assert_eq!(additive_header(3), vec!["target", "reg1", "reg2", "reg3"]);
        assert_eq!(additive_header(1), vec!["target", "reg"]);
        assert_eq!(additive_header(0), vec!["target"]);
    }

    #[test]
    fn full_header_includes_parameters_and_metadata() {
        let header = results_header(&RegulationModel::additive(2, true));
        assert_eq!(
            header,
            vec![
                "target",
                "reg1",
                "reg2",
                "w1",
                "w2",
                "constitutive",
                "cost",
                "iterations",
                "status"
            ]
        );
    }

    #[test]
    fn writes_rows_with_gene_names() {
        let ds = ExpressionDataset::new(
            vec![0.0, 1.0],
            vec![("A".into(), vec![1.0, 2.0]), ("B".into(), vec![0.5, 0.5])],
        )
        .unwrap();
        let model = RegulationModel::additive(1, false);
        let result = InferenceResult {
            task_id: TaskId(0),
            target: GeneId(0),
            regulators: vec![GeneId(1)],
            model,
            params: vec![2.5],
            cost: 0.125,
            iterations: 7,
            status: FitStatus::Converged,
        };
        let mut w = ResultsWriter::new(Vec::new(), model).unwrap();
        w.write_all(&ds, std::slice::from_ref(&result)).unwrap();
        assert_eq!(w.rows(), 1);
        let text = String::from_utf8(w.into_inner().unwrap()).unwrap();
        assert_eq!(text, "target,reg,w,cost,iterations,status\nA,B,2.5,0.125,7,converged\n");
    }

    #[test]
    fn rejects_mismatched_model() {
        let ds = ExpressionDataset::new(vec![0.0, 1.0], vec![("A".into(), vec![1.0, 2.0])])
            .unwrap();
        let result = InferenceResult {
            task_id: TaskId(0),
            target: GeneId(0),
            regulators: vec![],
            model: RegulationModel::additive(0, true),
            params: vec![1.5],
            cost: 0.5,
            iterations: 1,
            status: FitStatus::Converged,
        };
        let mut w = ResultsWriter::new(Vec::new(), RegulationModel::additive(1, false)).unwrap();
        assert!(matches!(w.write(&ds, &result), Err(Error::Validation(_))));
    }

    #[test]
    fn unresolved_pairings_echo_raw_names() {
        let model = RegulationModel::additive(2, true);
        let mut w = ResultsWriter::new(Vec::new(), model).unwrap();
        w.write_unresolved("A", &["B".to_string(), "Zz9".to_string()]).unwrap();
        assert_eq!(w.rows(), 1);

        let err = w.write_unresolved("A", &["B".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
        assert_eq!(w.rows(), 1);

        let text = String::from_utf8(w.into_inner().unwrap()).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert_eq!(row, "A,B,Zz9,,,,,,unresolved");
        assert_eq!(row.split(',').count(), results_header(&model).len());
    }
}
