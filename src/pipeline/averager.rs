use ndarray::Array2;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::pool::WorkerPool;
use super::progress::ProgressReporter;
use crate::algorithms::{ElasticParams, ImagePair, RegistrationPrimitive};
use crate::error::{RegistrationError, Result};
use crate::transform::DeformationField;

pub const STAGE_REGISTER: &str = "register";

/// All-pairs registration of a set of projections, averaged per source.
///
/// For source `s` the primitive is called once per target `t` (including
/// `t == s` unless the self pair is disabled) and the resulting fields are
/// averaged coefficient-wise. That is `N^2` primitive calls per plane.
pub struct PairwiseAverager<'a> {
    primitive: &'a dyn RegistrationPrimitive,
    params: &'a ElasticParams,
    include_self_pair: bool,
    calls: AtomicUsize,
}

impl<'a> PairwiseAverager<'a> {
    pub fn new(primitive: &'a dyn RegistrationPrimitive, params: &'a ElasticParams) -> Self {
        Self {
            primitive,
            params,
            include_self_pair: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn include_self_pair(mut self, include: bool) -> Self {
        self.include_self_pair = include;
        self
    }

    /// Primitive calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Primitive calls needed for `n` projections.
    pub fn calls_for(&self, n: usize) -> usize {
        if self.include_self_pair {
            n * n
        } else {
            n * n.saturating_sub(1)
        }
    }

    fn targets(&self, source: usize, n: usize) -> impl Iterator<Item = usize> + '_ {
        let include_self = self.include_self_pair;
        (0..n).filter(move |&t| include_self || t != source)
    }

    /// Averaged field of one source against every target.
    pub fn average_for(
        &self,
        source: usize,
        projections: &[Array2<f32>],
        progress: &ProgressReporter,
    ) -> Result<DeformationField> {
        let source_image = projections
            .get(source)
            .ok_or_else(|| RegistrationError::MissingVolume {
                stage: STAGE_REGISTER.to_string(),
                index: source,
            })?;

        let mut fields = Vec::with_capacity(projections.len());
        for target in self.targets(source, projections.len()) {
            let pair = ImagePair::new(&projections[target], source_image);
            let field = self.primitive.register_pair(&pair, self.params)?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            progress.advance(STAGE_REGISTER);
            fields.push(field);
        }

        DeformationField::average(&fields)
    }

    /// One averaged field per projection, computed in parallel across sources.
    pub fn average_all(
        &self,
        pool: &WorkerPool,
        projections: &[Array2<f32>],
        progress: &ProgressReporter,
    ) -> Result<Vec<DeformationField>> {
        if projections.is_empty() {
            return Ok(Vec::new());
        }
        if let Some((index, _)) = projections
            .iter()
            .enumerate()
            .find(|(_, p)| p.dim() != projections[0].dim())
        {
            return Err(RegistrationError::invalid_dimensions(format!(
                "projection {} differs in size from projection 0",
                index
            )));
        }

        progress.begin(STAGE_REGISTER, self.calls_for(projections.len()));
        let sources: Vec<usize> = (0..projections.len()).collect();
        pool.fork_join(STAGE_REGISTER, sources, |_, source| {
            self.average_for(source, projections, progress)
        })
    }
}
