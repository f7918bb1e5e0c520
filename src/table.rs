use arrow::{
    array::{ArrayBuilder, ArrayRef, PrimitiveBuilder, StructArray},
    datatypes::{DataType, Field, Float64Type},
};
use faer::MatRef;

use crate::{
    error::{Result, SamplerError},
    problem::Problem,
};

/// Which columns a sample table contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Columns {
    /// Only the included metabolites of the problem.
    #[default]
    Concentrations,
    /// Every solver variable, including equilibrium constants and slacks.
    Variables,
}

/// Map log-space samples (one row per sample) back to linear space.
///
/// The result has one non-nullable `Float64` field per selected variable,
/// in problem variable order.
pub fn to_table(
    problem: &Problem,
    samples: MatRef<'_, f64>,
    columns: Columns,
) -> Result<StructArray> {
    if samples.ncols() != problem.dim() {
        return Err(SamplerError::MalformedProblem(format!(
            "samples have {} columns but the problem has {} variables",
            samples.ncols(),
            problem.dim()
        )));
    }

    let selected: Vec<usize> = match columns {
        Columns::Variables => (0..problem.dim()).collect(),
        Columns::Concentrations => problem
            .variables()
            .iter()
            .enumerate()
            .filter(|(_, name)| problem.included_metabolites().contains(name))
            .map(|(i, _)| i)
            .collect(),
    };
    if selected.is_empty() {
        return Err(SamplerError::MalformedProblem(
            "no metabolite columns to return".into(),
        ));
    }

    let names = problem.variables();
    let fields: Vec<Field> = selected
        .iter()
        .map(|&j| Field::new(&names[j], DataType::Float64, false))
        .collect();

    let arrays: Vec<ArrayRef> = selected
        .iter()
        .map(|&j| {
            let mut builder = PrimitiveBuilder::<Float64Type>::with_capacity(samples.nrows());
            samples
                .col(j)
                .iter()
                .for_each(|&val| builder.append_value(val.exp()));
            ArrayBuilder::finish(&mut builder)
        })
        .collect();

    Ok(StructArray::try_new(fields.into(), arrays, None)?)
}
