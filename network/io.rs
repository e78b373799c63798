//! # Tabular Input and Output
//!
//! Expression data is read from tab-separated files with genes as rows: the
//! header holds the sample labels (its first cell names the gene column and is
//! ignored) and the first column of every row holds the gene label. `NA`,
//! `NaN` and empty cells are missing; any other cell must be a number, and
//! expression values must also be finite. Weight files share the layout.
//!
//! Results (filtered matrices, keep-masks, fit tables, adjacency matrices) are
//! written back as TSV with missing or undefined values spelled `NA`.

use crate::adjacency::Adjacency;
use crate::error::NetworkError;
use crate::filter::FilterOutcome;
use crate::matrix::ExpressionMatrix;
use crate::threshold::SoftThresholdResult;
use csv::{ReaderBuilder, Writer, WriterBuilder};
use ndarray::Array2;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Malformed tab-separated file: {0}")]
    CsvError(#[from] csv::Error),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("The input file '{0}' has no sample columns.")]
    NoSamples(String),
    #[error("Data row {row} has no gene label.")]
    MissingGeneLabel { row: usize },
}

/// Reads a genes × samples expression matrix.
pub fn read_expression(path: impl AsRef<Path>) -> Result<ExpressionMatrix, DataError> {
    let table = read_table(path.as_ref())?;
    Ok(ExpressionMatrix::new(
        table.values,
        table.gene_labels,
        table.sample_labels,
    )?)
}

/// Reads a weight matrix laid out like an expression file.
///
/// Unlike expression values, infinite weights are kept as read: the network
/// stages treat non-finite weights as missing observations.
pub fn read_weights(path: impl AsRef<Path>) -> Result<Array2<f64>, DataError> {
    Ok(read_table(path.as_ref())?.values)
}

struct Table {
    gene_labels: Vec<String>,
    sample_labels: Vec<String>,
    values: Array2<f64>,
}

fn read_table(path: &Path) -> Result<Table, DataError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let sample_labels: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
    if sample_labels.is_empty() {
        return Err(DataError::NoSamples(path.display().to_string()));
    }

    let mut gene_labels = Vec::new();
    let mut cells = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let label = record
            .get(0)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(DataError::MissingGeneLabel { row })?;
        gene_labels.push(label.to_string());
        for (col, cell) in record.iter().skip(1).enumerate() {
            cells.push(parse_cell(cell).ok_or_else(|| NetworkError::NonNumericInput {
                context: format!("{} (gene '{label}')", path.display()),
                row,
                col,
            })?);
        }
    }

    log::info!(
        "Read {} genes x {} samples from {}.",
        gene_labels.len(),
        sample_labels.len(),
        path.display()
    );
    let values = Array2::from_shape_vec((gene_labels.len(), sample_labels.len()), cells)
        .map_err(|err| NetworkError::InvalidParameter(err.to_string()))?;
    Ok(Table {
        gene_labels,
        sample_labels,
        values,
    })
}

/// Writes an expression matrix in the layout [`read_expression`] reads.
pub fn write_expression(path: impl AsRef<Path>, expr: &ExpressionMatrix) -> Result<(), DataError> {
    let mut writer = tsv_writer(path.as_ref())?;
    writer.write_field("gene")?;
    writer.write_record(expr.sample_labels())?;
    for (label, row) in expr.gene_labels().iter().zip(expr.values().rows()) {
        writer.write_field(label)?;
        writer.write_record(row.iter().map(|&v| format_value(v)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one line per gene and per sample: `axis`, `label`, `keep`.
pub fn write_masks(
    path: impl AsRef<Path>,
    expr: &ExpressionMatrix,
    outcome: &FilterOutcome,
) -> Result<(), DataError> {
    let mut writer = tsv_writer(path.as_ref())?;
    writer.write_record(["axis", "label", "keep"])?;
    for (label, keep) in expr.gene_labels().iter().zip(&outcome.good_genes) {
        writer.write_record(["gene", label.as_str(), bool_str(*keep)])?;
    }
    for (label, keep) in expr.sample_labels().iter().zip(&outcome.good_samples) {
        writer.write_record(["sample", label.as_str(), bool_str(*keep)])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the per-power fit table, including network concepts when present.
pub fn write_fit_table(path: impl AsRef<Path>, result: &SoftThresholdResult) -> Result<(), DataError> {
    let mut writer = tsv_writer(path.as_ref())?;
    let with_concepts = result.table.iter().any(|r| r.concepts.is_some());
    let mut header = vec![
        "Power",
        "SFT.R.sq",
        "slope",
        "truncated.R.sq",
        "mean.k",
        "median.k",
        "max.k",
    ];
    if with_concepts {
        header.extend(["Density", "Centralization", "Heterogeneity"]);
    }
    writer.write_record(&header)?;
    for record in &result.table {
        let mut fields = vec![
            format_value(record.power),
            format_value(record.r_squared),
            format_value(record.slope),
            format_value(record.truncated_r_squared),
            format_value(record.mean_k),
            format_value(record.median_k),
            format_value(record.max_k),
        ];
        if with_concepts {
            match record.concepts {
                Some(c) => fields.extend([c.density, c.centralization, c.heterogeneity].map(format_value)),
                None => fields.extend(std::iter::repeat_n("NA".to_string(), 3)),
            }
        }
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a labelled adjacency matrix.
pub fn write_adjacency(path: impl AsRef<Path>, adjacency: &Adjacency) -> Result<(), DataError> {
    let mut writer = tsv_writer(path.as_ref())?;
    writer.write_field("")?;
    writer.write_record(&adjacency.col_labels)?;
    for (label, row) in adjacency.row_labels.iter().zip(adjacency.matrix.rows()) {
        writer.write_field(label)?;
        writer.write_record(row.iter().map(|&v| format_value(v)))?;
    }
    writer.flush()?;
    Ok(())
}

fn tsv_writer(path: &Path) -> Result<Writer<File>, DataError> {
    Ok(WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("na") || cell.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NA".to_string()
    } else {
        value.to_string()
    }
}

fn bool_str(keep: bool) -> &'static str {
    if keep { "TRUE" } else { "FALSE" }
}
