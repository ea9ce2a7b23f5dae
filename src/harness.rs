//! Equivalence checks between local and remote predictions.

use crate::core::constants::DEFAULT_DECIMAL;
use crate::core::error::{EsMlError, Result};
use crate::core::math::almost_equal;
use crate::ml_model::MLModel;
use crate::transformers::LocalModel;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;

/// Checks `|local - remote| < 1.5 * 10^-decimal` elementwise.
///
/// Two NaNs at the same position compare equal.
pub fn assert_almost_equal(
    local: ArrayView1<'_, f64>,
    remote: ArrayView1<'_, f64>,
    decimal: i32,
) -> Result<()> {
    if local.len() != remote.len() {
        return Err(EsMlError::dimension_mismatch(
            format!("{} predictions", local.len()),
            format!("{} predictions", remote.len()),
        ));
    }

    let mismatches: Vec<(usize, f64, f64)> = local
        .iter()
        .zip(remote.iter())
        .enumerate()
        .filter(|(_, (l, r))| !almost_equal(**l, **r, decimal))
        .map(|(i, (l, r))| (i, *l, *r))
        .collect();

    if let Some(&(i, l, r)) = mismatches.first() {
        return Err(EsMlError::prediction_mismatch(format!(
            "{} of {} predictions differ at {} decimals; first at row {}: local {} remote {}",
            mismatches.len(),
            local.len(),
            decimal,
            i,
            l,
            r
        )));
    }
    Ok(())
}

/// Samples `size` rows of `data` with replacement.
pub fn random_rows<R: Rng + ?Sized>(data: ArrayView2<'_, f64>, size: usize, rng: &mut R) -> Array2<f64> {
    if data.nrows() == 0 {
        return Array2::zeros((0, data.ncols()));
    }
    let indices: Vec<usize> = (0..size).map(|_| rng.gen_range(0..data.nrows())).collect();
    data.select(Axis(0), &indices)
}

/// Predicts `test_data` locally and remotely and checks that both agree.
pub fn check_prediction_equality<M>(
    es_model: &MLModel,
    local_model: &M,
    test_data: ArrayView2<'_, f64>,
    decimal: i32,
) -> Result<()>
where
    M: LocalModel + ?Sized,
{
    let local = local_model.predict(test_data)?;
    let remote = es_model.predict(test_data)?;
    log::debug!(
        "Comparing {} predictions of model '{}'",
        local.len(),
        es_model.model_id()
    );
    assert_almost_equal(local.view(), remote.view(), decimal)
}

/// [`check_prediction_equality`] at the default two decimals.
pub fn check_prediction_equality_default<M>(
    es_model: &MLModel,
    local_model: &M,
    test_data: ArrayView2<'_, f64>,
) -> Result<()>
where
    M: LocalModel + ?Sized,
{
    check_prediction_equality(es_model, local_model, test_data, DEFAULT_DECIMAL)
}
