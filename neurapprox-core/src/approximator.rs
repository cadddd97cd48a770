//! The approximator facade. It owns the backend models and the training data
//! and runs the bundle training loop.
//!
//! Every setter that touches something the backend depends on applies the
//! matching [`Invalidation`] level, so cached outputs, the trained flag and
//! the persisted-state path never outlive the state they were derived from.

use crate::backend::{BackendFactory, NetworkArchitecture, TrainableModel};
use crate::bounds::{self, BoundingBox, Interval};
use crate::config::{ApproximatorConfig, TrainingSettings};
use crate::data::{Subset, TrainingDataSet, TrainingDataSource, VerificationIndexSet};
use crate::error::{ApproxError, Result};
use crate::metrics::{self, ErrorMeasure, ErrorSummary};
use crate::state::{DirtyFlags, Invalidation};
use crate::tolerance::{Tolerance, ToleranceKind, ToleranceSpec};
use crate::training::{
    BreakHandle, ConvergenceHistory, ConvergenceRecord, FamilyCheck, StopReason,
    TrainingOutcome, TrainingState, check_family, stop_criteria_met, tolerances_met,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Data bounds plus whether the caller pinned them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DataBounds {
    pub(crate) bbox: BoundingBox,
    pub(crate) explicit: bool,
}

/// Supervised approximator driving one or more backend models.
pub struct Approximator {
    pub(crate) factory: BackendFactory,
    pub(crate) config: ApproximatorConfig,
    pub(crate) settings: TrainingSettings,
    pub(crate) models: Vec<Box<dyn TrainableModel>>,
    pub(crate) neuron_input: Interval,
    pub(crate) neuron_output: Interval,
    pub(crate) data: Option<Arc<TrainingDataSet>>,
    pub(crate) verification: VerificationIndexSet,
    pub(crate) input_bounds: Option<DataBounds>,
    pub(crate) output_bounds: Option<DataBounds>,
    pub(crate) rms_tolerance: ToleranceSpec,
    pub(crate) max_tolerance: ToleranceSpec,
    pub(crate) history: ConvergenceHistory,
    pub(crate) flags: DirtyFlags,
    pub(crate) state: TrainingState,
    training_outputs: Vec<Vec<f64>>,
    verification_outputs: Vec<Vec<f64>>,
    break_handle: BreakHandle,
}

impl std::fmt::Debug for Approximator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Approximator")
            .field("backend", &self.factory.tag())
            .field("config", &self.config)
            .field("state", &self.state)
            .field("epoch_count", &self.flags.epoch_count)
            .field("trained", &self.flags.trained)
            .finish_non_exhaustive()
    }
}

impl Approximator {
    /// Create an approximator for `config`, using models built by `factory`.
    pub fn new(
        factory: BackendFactory,
        config: ApproximatorConfig,
        settings: TrainingSettings,
    ) -> Result<Self> {
        config.validate()?;
        settings.validate()?;
        let probe = factory.create();
        let neuron_input = probe.neuron_input_range();
        let neuron_output = probe.neuron_output_range();
        Ok(Self {
            factory,
            config,
            settings,
            models: Vec::new(),
            neuron_input,
            neuron_output,
            data: None,
            verification: VerificationIndexSet::empty(),
            input_bounds: None,
            output_bounds: None,
            rms_tolerance: ToleranceSpec::new(ToleranceKind::Rms),
            max_tolerance: ToleranceSpec::new(ToleranceKind::Max),
            history: ConvergenceHistory::new(),
            flags: DirtyFlags::new(),
            state: TrainingState::NotPrepared,
            training_outputs: Vec::new(),
            verification_outputs: Vec::new(),
            break_handle: BreakHandle::new(),
        })
    }

    // --- accessors ---

    pub fn backend_tag(&self) -> &str {
        self.factory.tag()
    }

    pub fn config(&self) -> &ApproximatorConfig {
        &self.config
    }

    pub fn settings(&self) -> &TrainingSettings {
        &self.settings
    }

    pub fn input_len(&self) -> usize {
        self.config.input_len
    }

    pub fn output_len(&self) -> usize {
        self.config.output_len
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn epoch_count(&self) -> usize {
        self.flags.epoch_count
    }

    pub fn is_trained(&self) -> bool {
        self.flags.trained
    }

    pub fn is_network_prepared(&self) -> bool {
        self.flags.network_prepared
    }

    pub fn is_training_data_prepared(&self) -> bool {
        self.flags.training_data_prepared
    }

    pub fn flags(&self) -> &DirtyFlags {
        &self.flags
    }

    pub fn training_data(&self) -> Option<&Arc<TrainingDataSet>> {
        self.data.as_ref()
    }

    pub fn verification_indices(&self) -> &VerificationIndexSet {
        &self.verification
    }

    pub fn input_data_bounds(&self) -> Option<&BoundingBox> {
        self.input_bounds.as_ref().map(|b| &b.bbox)
    }

    pub fn output_data_bounds(&self) -> Option<&BoundingBox> {
        self.output_bounds.as_ref().map(|b| &b.bbox)
    }

    pub fn input_neuron_range(&self) -> BoundingBox {
        BoundingBox::uniform(
            self.config.input_len,
            self.neuron_input.min,
            self.neuron_input.max,
        )
    }

    pub fn output_neuron_range(&self) -> BoundingBox {
        BoundingBox::uniform(
            self.config.output_len,
            self.neuron_output.min,
            self.neuron_output.max,
        )
    }

    pub fn rms_tolerance(&self) -> &ToleranceSpec {
        &self.rms_tolerance
    }

    pub fn max_tolerance(&self) -> &ToleranceSpec {
        &self.max_tolerance
    }

    pub fn convergence_history(&self) -> &ConvergenceHistory {
        &self.history
    }

    /// Handle another thread can use to cancel [`Approximator::train`].
    pub fn break_handle(&self) -> BreakHandle {
        self.break_handle.clone()
    }

    // --- invalidation ---

    /// Apply an invalidation cascade, dropping whatever it makes stale.
    pub(crate) fn invalidate(&mut self, level: Invalidation) {
        self.flags.invalidate(level);
        self.training_outputs.clear();
        self.verification_outputs.clear();
        if level >= Invalidation::Network {
            self.models.clear();
            self.state = TrainingState::NotPrepared;
        } else if level >= Invalidation::TrainingData && self.flags.network_prepared {
            self.state = TrainingState::Prepared;
        }
    }

    /// Destroy the backend models; configuration and data are kept.
    pub fn reset(&mut self) {
        info!(backend = self.factory.tag(), "Resetting approximator network");
        self.invalidate(Invalidation::Network);
    }

    // --- architecture ---

    /// Replace the network shape. Fails without side effects if it conflicts
    /// with the current training data.
    pub fn set_config(&mut self, config: ApproximatorConfig) -> Result<()> {
        config.validate()?;
        if let Some(data) = &self.data {
            data.check_dimensions(config.input_len, config.output_len)?;
        }
        if config == self.config {
            return Ok(());
        }
        if config.input_len != self.config.input_len {
            self.input_bounds = None;
        }
        if config.output_len != self.config.output_len {
            self.output_bounds = None;
            for spec in [&mut self.rms_tolerance, &mut self.max_tolerance] {
                if !spec.retain_if_compatible(config.output_len) {
                    warn!(kind = %spec.kind(), "Dropped tolerance incompatible with new output length");
                }
            }
        }
        self.config = config;
        self.invalidate(Invalidation::Network);
        self.derive_bounds()?;
        Ok(())
    }

    pub fn set_input_len(&mut self, input_len: usize) -> Result<()> {
        let mut config = self.config.clone();
        config.input_len = input_len;
        self.set_config(config)
    }

    pub fn set_output_len(&mut self, output_len: usize) -> Result<()> {
        let mut config = self.config.clone();
        config.output_len = output_len;
        self.set_config(config)
    }

    pub fn set_hidden_layers(&mut self, hidden_layers: Vec<usize>) -> Result<()> {
        let mut config = self.config.clone();
        config.hidden_layers = hidden_layers;
        self.set_config(config)
    }

    pub fn set_multiple_networks(&mut self, multiple: bool) -> Result<()> {
        let mut config = self.config.clone();
        config.multiple_networks = multiple;
        self.set_config(config)
    }

    // --- training settings ---

    pub fn set_max_epochs(&mut self, max_epochs: usize) {
        self.settings.max_epochs = max_epochs;
    }

    pub fn set_epochs_in_bundle(&mut self, epochs: usize) -> Result<()> {
        if epochs == 0 {
            return Err(ApproxError::invalid_config("epochs_in_bundle must be positive"));
        }
        self.settings.epochs_in_bundle = epochs;
        Ok(())
    }

    pub fn set_record_convergence(&mut self, record: bool) {
        self.settings.record_convergence = record;
    }

    /// Change the expansion applied to derived data bounds.
    pub fn set_safety_factor(&mut self, safety_factor: f64) -> Result<()> {
        if !safety_factor.is_finite() || safety_factor < 1.0 {
            return Err(ApproxError::invalid_config(format!(
                "safety factor must be >= 1.0, got {safety_factor}"
            )));
        }
        if safety_factor == self.settings.safety_factor {
            return Ok(());
        }
        let previous = self.settings.safety_factor;
        self.settings.safety_factor = safety_factor;
        let input = self.rederive(|d| d.input_range(), &self.input_bounds);
        let output = self.rederive(|d| d.output_range(), &self.output_bounds);
        let (input, output) = match (input, output) {
            (Ok(input), Ok(output)) => (input, output),
            (Err(e), _) | (_, Err(e)) => {
                self.settings.safety_factor = previous;
                return Err(e);
            }
        };
        let changed = input.is_some() || output.is_some();
        if let Some(b) = input {
            self.input_bounds = Some(b);
        }
        if let Some(b) = output {
            self.output_bounds = Some(b);
            self.rebase_tolerances();
        }
        if changed {
            self.invalidate(Invalidation::TrainingData);
        }
        Ok(())
    }

    // --- training data ---

    /// Attach training data. Derived bounds are recomputed; a verification
    /// set that no longer fits is dropped.
    pub fn set_training_data(&mut self, data: Arc<TrainingDataSet>) -> Result<()> {
        data.check_dimensions(self.config.input_len, self.config.output_len)?;
        if data.is_empty() {
            return Err(ApproxError::empty("training data has no points"));
        }
        let input = self.derived_or_explicit(&self.input_bounds, || data.input_range())?;
        let output = self.derived_or_explicit(&self.output_bounds, || data.output_range())?;

        if self.verification.check(data.len()).is_err() {
            warn!(
                held_out = self.verification.len(),
                points = data.len(),
                "Verification set does not fit new training data, clearing it"
            );
            self.verification = VerificationIndexSet::empty();
        }
        debug!(points = data.len(), "Training data attached");
        self.data = Some(data);
        self.input_bounds = Some(input);
        self.output_bounds = Some(output);
        self.rebase_tolerances();
        self.invalidate(Invalidation::TrainingData);
        Ok(())
    }

    /// Attach training data together with the points held out for verification.
    pub fn set_training_data_with_verification(
        &mut self,
        data: Arc<TrainingDataSet>,
        indices: impl IntoIterator<Item = usize>,
    ) -> Result<()> {
        let verification = VerificationIndexSet::new(indices, data.len())?;
        self.set_training_data(data)?;
        self.verification = verification;
        self.invalidate(Invalidation::TrainingData);
        Ok(())
    }

    /// Detach training data. Derived bounds go with it.
    pub fn clear_training_data(&mut self) {
        self.data = None;
        self.verification = VerificationIndexSet::empty();
        if self.input_bounds.as_ref().is_some_and(|b| !b.explicit) {
            self.input_bounds = None;
        }
        if self.output_bounds.as_ref().is_some_and(|b| !b.explicit) {
            self.output_bounds = None;
        }
        self.rebase_tolerances();
        self.invalidate(Invalidation::TrainingData);
    }

    /// Mark points as held out. Prior state is kept when validation fails.
    pub fn set_verification_indices(
        &mut self,
        indices: impl IntoIterator<Item = usize>,
    ) -> Result<()> {
        let len = self.data.as_ref().map_or(0, |d| d.len());
        let verification = VerificationIndexSet::new(indices, len)?;
        if self.data.is_none() && !verification.is_empty() {
            return Err(ApproxError::data("verification indices need training data"));
        }
        if verification != self.verification {
            self.verification = verification;
            self.invalidate(Invalidation::TrainingData);
        }
        Ok(())
    }

    /// Hold out `count` randomly chosen points.
    pub fn select_random_verification(&mut self, count: usize, seed: u64) -> Result<()> {
        let len = self
            .data
            .as_ref()
            .map(|d| d.len())
            .ok_or_else(|| ApproxError::data("verification indices need training data"))?;
        let picked = VerificationIndexSet::random(count, len, seed)?;
        self.set_verification_indices(picked.iter().collect::<Vec<_>>())
    }

    // --- bounds ---

    /// Pin the input data bounds, or pass `None` to derive them from data.
    pub fn set_input_data_bounds(&mut self, bounds: Option<BoundingBox>) -> Result<()> {
        let next = self.checked_bounds(bounds, self.config.input_len, "input data bounds")?;
        let next = match next {
            Some(b) => Some(b),
            None => self.derive_from_data(|d| d.input_range())?,
        };
        if next != self.input_bounds {
            self.input_bounds = next;
            self.invalidate(Invalidation::TrainingData);
        }
        Ok(())
    }

    /// Pin the output data bounds, or pass `None` to derive them from data.
    /// Relative tolerances are recomputed against the new range.
    pub fn set_output_data_bounds(&mut self, bounds: Option<BoundingBox>) -> Result<()> {
        let next = self.checked_bounds(bounds, self.config.output_len, "output data bounds")?;
        let next = match next {
            Some(b) => Some(b),
            None => self.derive_from_data(|d| d.output_range())?,
        };
        if next != self.output_bounds {
            self.output_bounds = next;
            self.rebase_tolerances();
            self.invalidate(Invalidation::TrainingData);
        }
        Ok(())
    }

    fn checked_bounds(
        &self,
        bounds: Option<BoundingBox>,
        expected: usize,
        what: &str,
    ) -> Result<Option<DataBounds>> {
        let Some(bbox) = bounds else {
            return Ok(None);
        };
        if bbox.dimension() != expected {
            return Err(ApproxError::dimension(what, expected, bbox.dimension()));
        }
        bbox.validate()?;
        Ok(Some(DataBounds {
            bbox,
            explicit: true,
        }))
    }

    fn derive_from_data<F>(&self, range: F) -> Result<Option<DataBounds>>
    where
        F: FnOnce(&TrainingDataSet) -> Result<BoundingBox>,
    {
        let Some(data) = &self.data else {
            return Ok(None);
        };
        Ok(Some(DataBounds {
            bbox: range(data.as_ref())?.expanded(self.settings.safety_factor)?,
            explicit: false,
        }))
    }

    /// Bounds re-derived under the current safety factor, or `None` when
    /// `current` is pinned or there is no data.
    fn rederive<F>(&self, range: F, current: &Option<DataBounds>) -> Result<Option<DataBounds>>
    where
        F: FnOnce(&TrainingDataSet) -> Result<BoundingBox>,
    {
        if current.as_ref().is_some_and(|b| b.explicit) {
            return Ok(None);
        }
        self.derive_from_data(range)
    }

    fn derived_or_explicit<F>(&self, current: &Option<DataBounds>, range: F) -> Result<DataBounds>
    where
        F: FnOnce() -> Result<BoundingBox>,
    {
        match current {
            Some(b) if b.explicit => Ok(b.clone()),
            _ => Ok(DataBounds {
                bbox: range()?.expanded(self.settings.safety_factor)?,
                explicit: false,
            }),
        }
    }

    /// Fill in any missing bounds from the training data.
    fn derive_bounds(&mut self) -> Result<()> {
        if self.input_bounds.is_none() {
            self.input_bounds = self.derive_from_data(|d| d.input_range())?;
        }
        if self.output_bounds.is_none() {
            self.output_bounds = self.derive_from_data(|d| d.output_range())?;
            self.rebase_tolerances();
        }
        Ok(())
    }

    fn rebase_tolerances(&mut self) {
        let bounds = self.output_bounds.as_ref().map(|b| &b.bbox);
        let len = self.config.output_len;
        self.rms_tolerance.rebase(len, bounds);
        self.max_tolerance.rebase(len, bounds);
    }

    // --- tolerances ---

    pub fn set_rms_tolerance(&mut self, tolerance: Tolerance) -> Result<()> {
        let bounds = self.output_bounds.as_ref().map(|b| &b.bbox);
        self.rms_tolerance
            .set(tolerance, self.config.output_len, bounds)
    }

    pub fn set_max_tolerance(&mut self, tolerance: Tolerance) -> Result<()> {
        let bounds = self.output_bounds.as_ref().map(|b| &b.bbox);
        self.max_tolerance
            .set(tolerance, self.config.output_len, bounds)
    }

    pub fn clear_rms_tolerance(&mut self) {
        self.rms_tolerance.clear();
    }

    pub fn clear_max_tolerance(&mut self) {
        self.max_tolerance.clear();
    }

    /// Absolute tolerance vector currently in force for `kind`.
    pub fn absolute_tolerance(&mut self, kind: ToleranceKind) -> Result<Option<Vec<f64>>> {
        let bounds = self.output_bounds.as_ref().map(|b| &b.bbox);
        let len = self.config.output_len;
        match kind {
            ToleranceKind::Rms => self.rms_tolerance.absolute_vector(len, bounds),
            ToleranceKind::Max => self.max_tolerance.absolute_vector(len, bounds),
        }
    }

    // --- preparation ---

    fn architecture(&self) -> NetworkArchitecture {
        NetworkArchitecture {
            input_len: self.config.input_len,
            output_len: if self.config.multiple_networks {
                1
            } else {
                self.config.output_len
            },
            hidden_layers: self.config.hidden_layers.clone(),
        }
    }

    /// Build the backend models if they do not exist yet.
    pub(crate) fn create_models(&mut self) -> Result<()> {
        if self.flags.network_prepared && !self.models.is_empty() {
            return Ok(());
        }
        let architecture = self.architecture();
        let mut models = Vec::with_capacity(self.config.network_count());
        for _ in 0..self.config.network_count() {
            let mut model = self.factory.create();
            model.create_network(&architecture)?;
            models.push(model);
        }
        debug!(
            backend = self.factory.tag(),
            networks = models.len(),
            "Backend networks created"
        );
        self.models = models;
        self.flags.network_prepared = true;
        if self.state == TrainingState::NotPrepared {
            self.state = TrainingState::Prepared;
        }
        Ok(())
    }

    fn bounds_pair(&self) -> Result<(&BoundingBox, &BoundingBox)> {
        match (&self.input_bounds, &self.output_bounds) {
            (Some(i), Some(o)) => Ok((&i.bbox, &o.bbox)),
            _ => Err(ApproxError::not_prepared(
                "data bounds are not defined; attach training data or set them explicitly",
            )),
        }
    }

    /// Scale the training subset and hand it to every backend model.
    fn prepare_training_data(&mut self) -> Result<()> {
        if self.flags.training_data_prepared {
            return Ok(());
        }
        let data = self
            .data
            .clone()
            .ok_or_else(|| ApproxError::not_prepared("no training data attached"))?;
        let indices = self.verification.select(Subset::Training, data.len());
        if indices.is_empty() {
            return Err(ApproxError::empty("training subset is empty"));
        }
        let (in_bounds, out_bounds) = self.bounds_pair()?;
        let in_neurons = self.input_neuron_range();
        let out_neurons = self.output_neuron_range();

        let mut inputs = Vec::with_capacity(indices.len());
        let mut outputs = Vec::with_capacity(indices.len());
        for &i in &indices {
            let element = data
                .element(i)
                .ok_or_else(|| ApproxError::data(format!("missing training point {i}")))?;
            inputs.push(bounds::map_vector(&element.input, in_bounds, &in_neurons)?);
            outputs.push(bounds::map_vector(&element.output, out_bounds, &out_neurons)?);
        }

        if self.config.multiple_networks {
            for (dim, model) in self.models.iter_mut().enumerate() {
                let column: Vec<Vec<f64>> = outputs.iter().map(|o| vec![o[dim]]).collect();
                model.set_training_data(&inputs, &column)?;
            }
        } else {
            for model in &mut self.models {
                model.set_training_data(&inputs, &outputs)?;
            }
        }
        self.flags.training_data_prepared = true;
        debug!(points = inputs.len(), "Scaled training data handed to backend");
        Ok(())
    }

    /// Create the backend models if absent and hand them the training data.
    /// Calling it again without intervening changes does nothing.
    pub fn prepare_network(&mut self) -> Result<()> {
        self.create_models()?;
        self.prepare_training_data()
    }

    // --- calculation & error evaluation ---

    /// Run `input` through the network(s) in data units.
    pub fn calculate(&self, input: &[f64]) -> Result<Vec<f64>> {
        if self.models.is_empty() {
            return Err(ApproxError::not_prepared("backend network has not been created"));
        }
        if input.len() != self.config.input_len {
            return Err(ApproxError::dimension("input vector", self.config.input_len, input.len()));
        }
        let (in_bounds, out_bounds) = self.bounds_pair()?;
        let scaled = bounds::map_vector(input, in_bounds, &self.input_neuron_range())?;
        let mut raw = Vec::with_capacity(self.config.output_len);
        for model in &self.models {
            raw.extend(model.calculate_output(&scaled)?);
        }
        if raw.len() != self.config.output_len {
            return Err(ApproxError::dimension(
                "backend output",
                self.config.output_len,
                raw.len(),
            ));
        }
        bounds::map_vector_inverse(&raw, out_bounds, &self.output_neuron_range())
    }

    fn subset_indices(&self, subset: Subset) -> Result<(Arc<TrainingDataSet>, Vec<usize>)> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| ApproxError::empty("no training data attached"))?;
        let indices = self.verification.select(subset, data.len());
        if indices.is_empty() {
            return Err(ApproxError::empty(format!("{subset:?} subset has no points")));
        }
        Ok((data, indices))
    }

    /// Compute calculated outputs for `subset` unless the cache is still valid.
    fn ensure_outputs(&mut self, subset: Subset, data: &TrainingDataSet, indices: &[usize]) -> Result<()> {
        let valid = match subset {
            Subset::Training => self.flags.training_outputs_valid,
            Subset::Verification => self.flags.verification_outputs_valid,
        };
        if valid {
            return Ok(());
        }
        let outputs = indices
            .iter()
            .map(|&i| {
                let input = data
                    .input(i)
                    .ok_or_else(|| ApproxError::data(format!("missing training point {i}")))?;
                self.calculate(input)
            })
            .collect::<Result<Vec<_>>>()?;
        match subset {
            Subset::Training => {
                self.training_outputs = outputs;
                self.flags.training_outputs_valid = true;
            }
            Subset::Verification => {
                self.verification_outputs = outputs;
                self.flags.verification_outputs_valid = true;
            }
        }
        Ok(())
    }

    /// Calculated outputs for every point of `subset`, in index order.
    pub fn calculated_outputs(&mut self, subset: Subset) -> Result<&[Vec<f64>]> {
        let (data, indices) = self.subset_indices(subset)?;
        self.ensure_outputs(subset, &data, &indices)?;
        Ok(match subset {
            Subset::Training => &self.training_outputs,
            Subset::Verification => &self.verification_outputs,
        })
    }

    /// Error vector of `measure` over `subset`.
    pub fn errors(&mut self, subset: Subset, measure: ErrorMeasure) -> Result<Vec<f64>> {
        let (data, indices) = self.subset_indices(subset)?;
        self.ensure_outputs(subset, &data, &indices)?;
        let prescribed: Vec<&[f64]> = indices.iter().filter_map(|&i| data.output(i)).collect();
        let calculated = match subset {
            Subset::Training => &self.training_outputs,
            Subset::Verification => &self.verification_outputs,
        };
        metrics::evaluate(measure, &prescribed, calculated, self.config.output_len)
    }

    pub fn training_rms_error(&mut self) -> Result<Vec<f64>> {
        self.errors(Subset::Training, ErrorMeasure::Rms)
    }

    pub fn training_max_error(&mut self) -> Result<Vec<f64>> {
        self.errors(Subset::Training, ErrorMeasure::Max)
    }

    pub fn training_mean_abs_error(&mut self) -> Result<Vec<f64>> {
        self.errors(Subset::Training, ErrorMeasure::MeanAbs)
    }

    pub fn verification_rms_error(&mut self) -> Result<Vec<f64>> {
        self.errors(Subset::Verification, ErrorMeasure::Rms)
    }

    pub fn verification_max_error(&mut self) -> Result<Vec<f64>> {
        self.errors(Subset::Verification, ErrorMeasure::Max)
    }

    pub fn verification_mean_abs_error(&mut self) -> Result<Vec<f64>> {
        self.errors(Subset::Verification, ErrorMeasure::MeanAbs)
    }

    /// RMS, max and mean-absolute errors of `subset` in one go.
    pub fn error_summary(&mut self, subset: Subset) -> Result<ErrorSummary> {
        let (data, indices) = self.subset_indices(subset)?;
        self.ensure_outputs(subset, &data, &indices)?;
        let prescribed: Vec<&[f64]> = indices.iter().filter_map(|&i| data.output(i)).collect();
        let calculated = match subset {
            Subset::Training => &self.training_outputs,
            Subset::Verification => &self.verification_outputs,
        };
        ErrorSummary::compute(&prescribed, calculated, self.config.output_len)
    }

    // --- training ---

    fn check_tolerances(&mut self) -> (FamilyCheck, FamilyCheck) {
        let rms_tol = self.absolute_tolerance(ToleranceKind::Rms);
        let rms = check_family(rms_tol, || self.training_rms_error());
        let max_tol = self.absolute_tolerance(ToleranceKind::Max);
        let max = check_family(max_tol, || self.training_max_error());
        (rms, max)
    }

    /// Epoch budget exhausted, or every configured tolerance family holds.
    pub fn stop_training_criteria_met(&mut self) -> bool {
        let (rms, max) = self.check_tolerances();
        stop_criteria_met(self.flags.epoch_count, self.settings.max_epochs, rms, max)
    }

    fn convergence_record(&mut self) -> Result<ConvergenceRecord> {
        let train_rms = self.training_rms_error()?;
        let train_max = self.training_max_error()?;
        let (verify_rms, verify_max) = if self.verification.is_empty() {
            (None, None)
        } else {
            (
                Some(self.verification_rms_error()?),
                Some(self.verification_max_error()?),
            )
        };
        Ok(ConvergenceRecord {
            epoch: self.flags.epoch_count,
            train_rms,
            train_max,
            verify_rms,
            verify_max,
        })
    }

    /// Run exactly one bundle of `epochs` epochs.
    ///
    /// Backend failures propagate unchanged; no retry is attempted. A failed
    /// bundle is not rolled back, so cached outputs are discarded up front.
    pub fn train_epochs(&mut self, epochs: usize) -> Result<()> {
        self.prepare_network()?;
        self.invalidate(Invalidation::Training);
        self.state = TrainingState::Training;
        for model in &mut self.models {
            if let Err(e) = model.train_epochs(epochs) {
                self.state = TrainingState::Prepared;
                return Err(e);
            }
        }
        self.flags.epoch_count += epochs;
        self.flags.trained = true;
        self.state = TrainingState::Prepared;

        if self.settings.record_convergence {
            let record = self.convergence_record()?;
            debug!(
                epoch = record.epoch,
                train_rms = ?record.train_rms,
                "Bundle finished"
            );
            self.history.push(record);
        } else {
            debug!(epoch = self.flags.epoch_count, "Bundle finished");
        }
        Ok(())
    }

    /// Train in bundles until the stop criteria hold or a break is requested.
    ///
    /// The convergence history starts afresh. The final bundle is shortened so
    /// the epoch count lands exactly on `max_epochs`.
    ///
    /// A break requested before the call cancels it before the first bundle.
    /// The break flag is cleared when the call returns.
    pub fn train(&mut self) -> Result<TrainingOutcome> {
        let result = self.run_bundles();
        self.break_handle.reset();
        result
    }

    fn run_bundles(&mut self) -> Result<TrainingOutcome> {
        self.history.clear();
        self.prepare_network()?;

        let start = self.flags.epoch_count;
        let max_epochs = self.settings.max_epochs;
        info!(
            backend = self.factory.tag(),
            start_epoch = start,
            max_epochs,
            bundle = self.settings.epochs_in_bundle,
            "Training started"
        );

        let mut bundles = 0;
        let reason = loop {
            if self.flags.epoch_count >= max_epochs {
                break StopReason::EpochLimitReached;
            }
            if self.break_handle.is_requested() {
                break StopReason::Cancelled;
            }
            let remaining = max_epochs - self.flags.epoch_count;
            self.train_epochs(self.settings.epochs_in_bundle.min(remaining))?;
            bundles += 1;

            let (rms, max) = self.check_tolerances();
            if tolerances_met(rms, max) {
                break StopReason::Converged;
            }
        };

        self.state = reason.into();
        let outcome = TrainingOutcome {
            reason,
            bundles,
            epochs: self.flags.epoch_count - start,
            epoch_count: self.flags.epoch_count,
        };
        info!(
            reason = ?outcome.reason,
            bundles = outcome.bundles,
            epoch_count = outcome.epoch_count,
            "Training stopped"
        );
        Ok(outcome)
    }
}

/// Lock-guarded approximator for use across threads.
///
/// Every call is serialized through one mutex. The break handle lives outside
/// the lock so a running [`SharedApproximator::train`] can be cancelled.
#[derive(Clone)]
pub struct SharedApproximator {
    inner: Arc<Mutex<Approximator>>,
    break_handle: BreakHandle,
}

impl SharedApproximator {
    pub fn new(approximator: Approximator) -> Self {
        let break_handle = approximator.break_handle();
        Self {
            inner: Arc::new(Mutex::new(approximator)),
            break_handle,
        }
    }

    /// Exclusive access; a poisoned lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Approximator> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Approximator) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn train(&self) -> Result<TrainingOutcome> {
        self.lock().train()
    }

    pub fn break_handle(&self) -> BreakHandle {
        self.break_handle.clone()
    }

    /// Request cancellation of a running `train` at the next bundle boundary.
    pub fn request_break(&self) {
        self.break_handle.request_break();
    }
}
