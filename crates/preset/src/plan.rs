//! Pass graph binding resolution
//!
//! This module turns the names a pass program declares into tagged input
//! sources. Resolution happens once per preset load and produces a frozen
//! [`ChainPlan`]: one binding table per pass plus the history depth every
//! history slot needs.
//!
//! Names carry a role suffix (`Texture` for samplers, `TexCoord` for vertex
//! attributes); the remaining stem is looked up in the alias table, then in
//! the lookup-texture ids, then against the naming conventions:
//!
//! | Stem | Source |
//! |---|---|
//! | (empty) | input of the pass |
//! | `Orig`, `Original` | pipeline source |
//! | `Pass<k>` | output of pass k in this frame |
//! | `PassPrev<n>` | output n positions back along the chain |
//! | `Prev`, `Prev<k>` | history of this pass's input |
//! | `OrigPrev`, `OrigPrev<k>` | history of the pipeline source |
//! | `Pass<j>Prev`, `Pass<j>Prev<k>` | history of pass j |

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use crate::preset::Preset;
use crate::reflect::ProgramInterface;

/// Deepest history lookback, in frames, a preset may request
pub const MAX_HISTORY_FRAMES: u32 = 16;

/// Vertex attribute carrying the quad position
pub const POSITION_ATTRIBUTE: &str = "VertexCoord";

const TEXTURE_SUFFIX: &str = "Texture";
const TEX_COORD_SUFFIX: &str = "TexCoord";

static CONVENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?<orig>Orig(?:inal)?)|Pass(?<pass>\d+)|PassPrev(?<passprev>\d+))?(?<prev>Prev(?<frames>\d*))?$").expect("valid regex")
});

static ALIAS_HISTORY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?<base>.+?)Prev(?<frames>\d*)$").expect("valid regex"));

/// Something whose past outputs can be retained across frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum HistorySlot {
    /// The pipeline source
    Original,
    /// A non-terminal pass
    Pass(usize),
}

/// Where a pass input comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InputSource {
    /// A lookup texture, by index into the preset's texture list
    Texture(usize),
    /// The pipeline source of the current frame
    Original,
    /// The output of an earlier pass in the current frame
    Pass(usize),
    /// A past output; `frames = k` reads the entry `k + 1` frames before the current one
    Prev { slot: HistorySlot, frames: u32 },
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Texture(index) => write!(f, "Texture({index})"),
            InputSource::Original => write!(f, "Original"),
            InputSource::Pass(index) => write!(f, "Pass({index})"),
            InputSource::Prev { slot: HistorySlot::Original, frames } => write!(f, "Prev(Original, {frames})"),
            InputSource::Prev { slot: HistorySlot::Pass(index), frames } => write!(f, "Prev(Pass({index}), {frames})"),
        }
    }
}

/// A sampled texture of a pass and its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamplerBinding {
    /// Binding slot of the `texture_2d` global
    pub unit: u32,
    pub name: String,
    pub source: InputSource,
}

/// A texture coordinate attribute of a pass and the source it addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TexCoordBinding {
    pub location: u32,
    pub name: String,
    pub source: InputSource,
}

/// The frozen binding table of one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassPlan {
    pub index: usize,
    /// In binding order
    pub samplers: Vec<SamplerBinding>,
    /// In location order
    pub tex_coords: Vec<TexCoordBinding>,
    pub position_location: Option<u32>,
    pub has_frame_count: bool,
    pub frame_count_mod: Option<u32>,
    /// Declared names that match no source
    pub skipped: Vec<String>,
}

impl PassPlan {
    /// Iterates over all sources this pass reads
    pub fn sources(&self) -> impl Iterator<Item = InputSource> + '_ {
        self.samplers.iter().map(|b| b.source).chain(self.tex_coords.iter().map(|b| b.source))
    }
}

/// Required history per slot, as the number of past frames to retain (0 = none)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryDepths {
    pub original: u32,
    /// One entry per pass
    pub passes: Vec<u32>,
}

impl HistoryDepths {
    /// Derives the depths from resolved binding tables
    ///
    /// The depth of a slot is the largest `frames + 1` any pass reads from it.
    pub fn from_passes(pass_count: usize, passes: &[PassPlan]) -> Self {
        let mut depths = HistoryDepths {
            original: 0,
            passes: vec![0; pass_count],
        };

        for source in passes.iter().flat_map(PassPlan::sources) {
            if let InputSource::Prev { slot, frames } = source {
                let depth = match slot {
                    HistorySlot::Original => &mut depths.original,
                    HistorySlot::Pass(index) => &mut depths.passes[index],
                };
                *depth = (*depth).max(frames + 1);
            }
        }

        depths
    }

    /// Depth of one slot
    pub fn depth(&self, slot: HistorySlot) -> u32 {
        match slot {
            HistorySlot::Original => self.original,
            HistorySlot::Pass(index) => self.passes.get(index).copied().unwrap_or(0),
        }
    }
}

/// The resolved binding plan of a whole preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainPlan {
    pub passes: Vec<PassPlan>,
    pub history: HistoryDepths,
}

impl ChainPlan {
    /// Resolves every pass of a preset against its reflected program
    ///
    /// # Arguments
    /// * `preset` - The validated preset
    /// * `interfaces` - One reflected program interface per pass, in pass order
    pub fn build(preset: &Preset, interfaces: &[ProgramInterface]) -> Result<Self, BindingError> {
        let resolver = BindingResolver::new(preset);
        let passes = interfaces
            .iter()
            .enumerate()
            .map(|(index, interface)| resolver.resolve_pass(index, interface))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_passes(preset.passes.len(), passes))
    }

    /// Wraps already resolved passes and derives their history depths
    pub fn from_passes(pass_count: usize, passes: Vec<PassPlan>) -> Self {
        let history = HistoryDepths::from_passes(pass_count, &passes);
        Self { passes, history }
    }
}

/// Errors raised when a declared name refers to a source that cannot exist
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("pass {pass}: `{name}` refers to pass {target}, but the preset has only {count} passes")]
    PassOutOfRange { pass: usize, name: String, target: usize, count: usize },
    #[error("pass {pass}: `{name}` refers to pass {target}, which has not been drawn yet in this frame")]
    PassNotYetDrawn { pass: usize, name: String, target: usize },
    #[error("pass {pass}: `{name}` looks {distance} passes back, which is outside the chain")]
    InvalidPassPrev { pass: usize, name: String, distance: usize },
    #[error("pass {pass}: `{name}` asks for the history of pass {target}, but the preset has only {count} passes")]
    HistoryOutOfRange { pass: usize, name: String, target: usize, count: usize },
    #[error("pass {pass}: `{name}` asks for the history of the last pass, whose output is not retained")]
    TerminalHistory { pass: usize, name: String },
    #[error("pass {pass}: `{name}` looks {} frames back; at most {max} are supported", .frames.saturating_add(1), max = MAX_HISTORY_FRAMES)]
    HistoryTooDeep { pass: usize, name: String, frames: u32 },
    #[error("pass {pass}: alias `{alias}` points at `{target}`, which names no source")]
    UnresolvedAlias { pass: usize, alias: String, target: String },
}

/// Resolves declared names of the passes of one preset
pub struct BindingResolver<'a> {
    preset: &'a Preset,
    aliases: BTreeMap<String, String>,
}

impl<'a> BindingResolver<'a> {
    pub fn new(preset: &'a Preset) -> Self {
        Self {
            preset,
            aliases: preset.alias_table(),
        }
    }

    fn pass_count(&self) -> usize {
        self.preset.passes.len()
    }

    /// Builds the binding table of pass `index`
    pub fn resolve_pass(&self, index: usize, interface: &ProgramInterface) -> Result<PassPlan, BindingError> {
        let mut plan = PassPlan {
            index,
            samplers: Vec::new(),
            tex_coords: Vec::new(),
            position_location: None,
            has_frame_count: interface.has_frame_count(),
            frame_count_mod: self.preset.passes.get(index).and_then(|pass| pass.frame_count_mod).filter(|&cycle| cycle != 0),
            skipped: Vec::new(),
        };

        for texture in &interface.textures {
            match self.resolve_name(index, &texture.name, TEXTURE_SUFFIX)? {
                Some(source) => plan.samplers.push(SamplerBinding {
                    unit: texture.binding,
                    name: texture.name.clone(),
                    source,
                }),
                None => plan.skipped.push(texture.name.clone()),
            }
        }

        for attribute in &interface.attributes {
            if attribute.name == POSITION_ATTRIBUTE {
                plan.position_location = Some(attribute.location);
                continue;
            }
            match self.resolve_name(index, &attribute.name, TEX_COORD_SUFFIX)? {
                Some(source) => plan.tex_coords.push(TexCoordBinding {
                    location: attribute.location,
                    name: attribute.name.clone(),
                    source,
                }),
                None => plan.skipped.push(attribute.name.clone()),
            }
        }

        Ok(plan)
    }

    /// Resolves one declared name of pass `index`
    ///
    /// Returns `Ok(None)` for names that match nothing. Lookup texture ids
    /// match with or without the role suffix.
    pub fn resolve_name(&self, index: usize, name: &str, suffix: &str) -> Result<Option<InputSource>, BindingError> {
        let stem = name.strip_suffix(suffix);

        if let Some(stem) = stem {
            if let Some(source) = self.resolve_alias(index, name, stem)? {
                return Ok(Some(source));
            }
        }

        if let Some(texture) = self.texture_index(name).or_else(|| stem.and_then(|stem| self.texture_index(stem))) {
            return Ok(Some(InputSource::Texture(texture)));
        }

        match stem {
            Some(stem) => self.resolve_convention(index, name, stem),
            None => Ok(None),
        }
    }

    fn texture_index(&self, id: &str) -> Option<usize> {
        self.preset.textures.iter().position(|texture| texture.id == id)
    }

    fn resolve_alias(&self, index: usize, name: &str, stem: &str) -> Result<Option<InputSource>, BindingError> {
        if let Some(target) = self.aliases.get(stem) {
            let resolved = match self.texture_index(target) {
                Some(texture) => Some(InputSource::Texture(texture)),
                None => self.resolve_convention(index, name, target)?,
            };
            return resolved.map(Some).ok_or_else(|| BindingError::UnresolvedAlias {
                pass: index,
                alias: stem.to_string(),
                target: target.clone(),
            });
        }

        // `<alias>Prev<k>` reads the history of an aliased source; lookup textures have none
        let Some(captures) = ALIAS_HISTORY_RE.captures(stem) else {
            return Ok(None);
        };
        let alias = captures.name("base").map_or("", |m| m.as_str());
        let Some(target) = self.aliases.get(alias) else {
            return Ok(None);
        };
        if self.texture_index(target).is_some() {
            return Ok(None);
        }
        self.resolve_convention(index, name, &format!("{target}Prev{}", &captures["frames"]))
    }

    fn resolve_convention(&self, index: usize, name: &str, stem: &str) -> Result<Option<InputSource>, BindingError> {
        let Some(captures) = CONVENTION_RE.captures(stem) else {
            return Ok(None);
        };

        let base = if captures.name("orig").is_some() {
            InputSource::Original
        } else if let Some(pass) = captures.name("pass") {
            let target = parse_index(pass.as_str());
            if captures.name("prev").is_some() {
                // History of a later pass is a feedback loop and allowed
                InputSource::Pass(target)
            } else {
                self.same_frame_pass(index, name, target)?
            }
        } else if let Some(distance) = captures.name("passprev") {
            if captures.name("prev").is_some() {
                return Ok(None);
            }
            let distance = parse_index(distance.as_str());
            if distance == 0 || distance > index + 1 {
                return Err(BindingError::InvalidPassPrev {
                    pass: index,
                    name: name.to_string(),
                    distance,
                });
            }
            return Ok(Some(self.input_of(index + 1 - distance)));
        } else {
            self.input_of(index)
        };

        let Some(_) = captures.name("prev") else {
            return Ok(Some(base));
        };

        let frames = parse_frames(captures.name("frames").map_or("", |m| m.as_str()));
        let slot = match base {
            InputSource::Pass(target) => HistorySlot::Pass(target),
            _ => HistorySlot::Original,
        };
        self.history(index, name, slot, frames).map(Some)
    }

    /// Source read by a bare name on pass `index`: the previous pass, or the pipeline source for pass 0
    fn input_of(&self, index: usize) -> InputSource {
        match index {
            0 => InputSource::Original,
            _ => InputSource::Pass(index - 1),
        }
    }

    fn same_frame_pass(&self, index: usize, name: &str, target: usize) -> Result<InputSource, BindingError> {
        if target >= self.pass_count() {
            return Err(BindingError::PassOutOfRange {
                pass: index,
                name: name.to_string(),
                target,
                count: self.pass_count(),
            });
        }
        if target >= index {
            return Err(BindingError::PassNotYetDrawn {
                pass: index,
                name: name.to_string(),
                target,
            });
        }
        Ok(InputSource::Pass(target))
    }

    fn history(&self, index: usize, name: &str, slot: HistorySlot, frames: u32) -> Result<InputSource, BindingError> {
        if let HistorySlot::Pass(target) = slot {
            if target >= self.pass_count() {
                return Err(BindingError::HistoryOutOfRange {
                    pass: index,
                    name: name.to_string(),
                    target,
                    count: self.pass_count(),
                });
            }
            if target + 1 == self.pass_count() {
                return Err(BindingError::TerminalHistory {
                    pass: index,
                    name: name.to_string(),
                });
            }
        }
        if frames >= MAX_HISTORY_FRAMES {
            return Err(BindingError::HistoryTooDeep {
                pass: index,
                name: name.to_string(),
                frames,
            });
        }
        Ok(InputSource::Prev { slot, frames })
    }
}

fn parse_index(digits: &str) -> usize {
    digits.parse().unwrap_or(usize::MAX)
}

fn parse_frames(digits: &str) -> u32 {
    if digits.is_empty() { 0 } else { digits.parse().unwrap_or(u32::MAX) }
}
