//! Render target pool
//!
//! Every pass except the last draws into an off-screen target. A pass whose
//! output is read by later frames keeps a [`HistoryRing`] of targets instead
//! of a single one, and so does the pipeline source when a pass reads its
//! history.

use shaderchain_preset::{PassScale, TargetFormat};
use tracing::debug;

use crate::backend::RenderBackend;
use crate::error::{TargetError, TargetOwner};
use crate::history::HistoryRing;

/// An allocated target and a sampleable handle to it
pub struct PoolTarget<B: RenderBackend> {
    pub target: B::Target,
    pub texture: B::Texture,
}

/// Sizing and format rules of one ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    pub format: TargetFormat,
    /// Number of ring slots (1 when no history is read)
    pub slots: usize,
}

struct PoolEntry<B: RenderBackend> {
    owner: TargetOwner,
    spec: TargetSpec,
    size: Option<(u32, u32)>,
    ring: Option<HistoryRing<PoolTarget<B>>>,
}

impl<B: RenderBackend> PoolEntry<B> {
    fn new(owner: TargetOwner, spec: TargetSpec) -> Self {
        Self { owner, spec, size: None, ring: None }
    }

    /// Reallocates the ring if its size changed; returns whether it did
    fn ensure_size(&mut self, backend: &mut B, size: (u32, u32)) -> Result<bool, TargetError> {
        if self.size == Some(size) && self.ring.is_some() {
            return Ok(false);
        }

        let owner = self.owner;
        let label = format!("{owner} target");
        let format = self.spec.format;
        let ring = HistoryRing::try_from_fn(self.spec.slots, |_| {
            let target = backend.create_target(&label, size.0, size.1, format).map_err(|source| TargetError::Allocation { owner, source })?;
            let texture = backend.target_texture(&target);
            Ok(PoolTarget { target, texture })
        })?;

        debug!(owner = %self.owner, width = size.0, height = size.1, slots = ring.len(), "allocated render targets");
        self.ring = Some(ring);
        self.size = Some(size);
        Ok(true)
    }
}

/// Computes the target size of every pass, in pass order
///
/// `Input` scales use the size computed for the previous pass (the source size
/// for pass 0). Dimensions that round to 0 are raised to 1.
pub fn compute_sizes(scales: &[PassScale], source: (u32, u32), viewport: (u32, u32)) -> Vec<(u32, u32)> {
    let mut input = source;
    scales
        .iter()
        .map(|scale| {
            let (width, height) = scale.resolve(input, source, viewport);
            input = (width.max(1), height.max(1));
            input
        })
        .collect()
}

/// Off-screen targets of all non-terminal passes plus the source history
pub struct TargetPool<B: RenderBackend> {
    scales: Vec<PassScale>,
    passes: Vec<PoolEntry<B>>,
    original: Option<PoolEntry<B>>,
}

impl<B: RenderBackend> TargetPool<B> {
    /// Creates an empty pool; nothing is allocated until [`TargetPool::resize`]
    ///
    /// # Arguments
    /// * `scales` - Scale rules of all passes, the terminal one included
    /// * `specs` - One spec per non-terminal pass
    /// * `original_slots` - Ring length for the source history, if any pass reads it
    pub fn new(scales: Vec<PassScale>, specs: Vec<TargetSpec>, original_slots: Option<usize>) -> Self {
        Self {
            scales,
            passes: specs.into_iter().enumerate().map(|(index, spec)| PoolEntry::new(TargetOwner::Pass(index), spec)).collect(),
            original: original_slots.map(|slots| {
                PoolEntry::new(
                    TargetOwner::Original,
                    TargetSpec {
                        format: TargetFormat::Rgba8Unorm,
                        slots,
                    },
                )
            }),
        }
    }

    /// Number of pass rings (one per non-terminal pass)
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Recomputes every size and reallocates the rings whose size changed
    ///
    /// All sizes are checked against the device limit before anything is
    /// allocated. Reallocated rings start with no recorded history.
    ///
    /// # Returns
    /// The number of rings that were reallocated
    pub fn resize(&mut self, backend: &mut B, source: (u32, u32), viewport: (u32, u32)) -> Result<usize, TargetError> {
        let sizes = compute_sizes(&self.scales, source, viewport);
        let source = (source.0.max(1), source.1.max(1));
        let max = backend.max_texture_dimension();

        let requests = self.passes.iter().zip(&sizes).map(|(entry, size)| (entry.owner, *size));
        let original = self.original.as_ref().map(|entry| (entry.owner, source));
        for (owner, (width, height)) in requests.chain(original) {
            if width > max || height > max {
                return Err(TargetError::TooLarge { owner, width, height, max });
            }
        }

        let mut reallocated = 0;
        for (entry, size) in self.passes.iter_mut().zip(&sizes) {
            reallocated += entry.ensure_size(backend, *size)? as usize;
        }
        if let Some(entry) = &mut self.original {
            reallocated += entry.ensure_size(backend, source)? as usize;
        }
        Ok(reallocated)
    }

    /// Current size of pass `index`'s target
    pub fn size(&self, index: usize) -> Option<(u32, u32)> {
        self.passes.get(index).and_then(|entry| entry.size)
    }

    /// Ring of pass `index`, once allocated
    pub fn pass(&self, index: usize) -> Option<&HistoryRing<PoolTarget<B>>> {
        self.passes.get(index).and_then(|entry| entry.ring.as_ref())
    }

    /// Ring of the source history, once allocated
    pub fn original(&self) -> Option<&HistoryRing<PoolTarget<B>>> {
        self.original.as_ref().and_then(|entry| entry.ring.as_ref())
    }

    /// Ends the frame for every ring
    pub fn advance(&mut self) {
        for entry in self.passes.iter_mut().chain(self.original.as_mut()) {
            if let Some(ring) = &mut entry.ring {
                ring.advance();
            }
        }
    }
}
