//! Shader preset data model
//!
//! A preset is an ordered chain of shader passes, the lookup textures they may
//! sample and an alias table mapping extra names onto the binding conventions.
//! Presets are authored either as YAML manifests or as libretro `.glslp` files;
//! both end up in the same [`Preset`] value.

use serde::{Deserialize, Serialize};
use serde::de::{self, Deserializer, Visitor};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::PresetError;

/// Represents a rational scale factor as a fraction
///
/// Accepts whole numbers (`"2"`), fractions (`"1/2"`) and decimals (`"1.5"`,
/// stored as `3/2`) so values written for other preset runtimes keep their
/// exact meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFactor {
    /// The numerator of the fraction
    pub numerator: u32,
    /// The denominator of the fraction
    pub denominator: u32,
}

impl ScaleFactor {
    /// The unit scale (1/1)
    pub const ONE: ScaleFactor = ScaleFactor { numerator: 1, denominator: 1 };

    /// Creates a new scale factor from numerator and denominator
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self { numerator, denominator }
    }

    /// Multiplies `base` by this factor, rounding to the nearest integer
    pub fn apply(&self, base: u32) -> u32 {
        let numerator = base as u64 * self.numerator as u64;
        let denominator = self.denominator as u64;
        ((numerator + denominator / 2) / denominator).min(u32::MAX as u64) as u32
    }

    fn reduced(numerator: u32, denominator: u32) -> Self {
        let divisor = gcd(numerator, denominator).max(1);
        Self::new(numerator / divisor, denominator / divisor)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::ONE
    }
}

impl FromStr for ScaleFactor {
    type Err = ScaleFactorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((numerator, denominator)) = s.split_once('/') {
            let numerator = numerator.trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)?;
            let denominator = denominator.trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidDenominator)?;

            if denominator == 0 {
                return Err(ScaleFactorParseError::ZeroDenominator);
            }

            Ok(ScaleFactor::new(numerator, denominator))
        } else if let Some((whole, fraction)) = s.split_once('.') {
            // "1.5" -> 15/10 -> 3/2
            if fraction.len() > 6 || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return Err(ScaleFactorParseError::InvalidFormat);
            }
            let whole = if whole.is_empty() { 0 } else { whole.parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)? };
            let denominator = 10u32.pow(fraction.len() as u32);
            let fraction = if fraction.is_empty() { 0 } else { fraction.parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidFormat)? };
            let numerator = whole.checked_mul(denominator).and_then(|n| n.checked_add(fraction)).ok_or(ScaleFactorParseError::InvalidNumerator)?;
            Ok(ScaleFactor::reduced(numerator, denominator))
        } else {
            let numerator = s.parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator)?;
            Ok(ScaleFactor::new(numerator, 1))
        }
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

impl<'de> Deserialize<'de> for ScaleFactor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ScaleFactorVisitor;

        impl Visitor<'_> for ScaleFactorVisitor {
            type Value = ScaleFactor;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a scale factor such as 2, \"1/2\" or 1.5")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ScaleFactor, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ScaleFactor, E> {
                u32::try_from(v).map(|n| ScaleFactor::new(n, 1)).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ScaleFactor, E> {
                u32::try_from(v).map(|n| ScaleFactor::new(n, 1)).map_err(E::custom)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<ScaleFactor, E> {
                format!("{v:?}").parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ScaleFactorVisitor)
    }
}

/// Error types for scale factor parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScaleFactorParseError {
    /// The format is not recognized (should be "n", "n/d" or "n.f")
    #[error("Invalid scale factor format")]
    InvalidFormat,
    /// The numerator is not a valid integer
    #[error("Invalid numerator")]
    InvalidNumerator,
    /// The denominator is not a valid integer
    #[error("Invalid denominator")]
    InvalidDenominator,
    /// The denominator is zero (division by zero)
    #[error("Denominator cannot be zero")]
    ZeroDenominator,
}

/// What a pass's scale factor is relative to
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleType {
    /// Size of the pass input: the previous pass's target, or the pipeline source for pass 0
    #[default]
    #[serde(alias = "source")]
    Input,
    /// Size of the pipeline source, whatever the pass position
    Original,
    /// Size of the host output surface
    Viewport,
    /// The factor is an absolute pixel count
    Absolute,
}

impl FromStr for ScaleType {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "source" | "input" => Ok(ScaleType::Input),
            "original" => Ok(ScaleType::Original),
            "viewport" => Ok(ScaleType::Viewport),
            "absolute" => Ok(ScaleType::Absolute),
            other => Err(PresetError::InvalidValue {
                key: "scale_type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Scale rule for one axis of a pass target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisScale {
    /// Reference the factor applies to
    pub kind: ScaleType,
    /// Multiplier, or pixel count for [`ScaleType::Absolute`]
    pub factor: ScaleFactor,
}

impl AxisScale {
    /// Computes the axis length given the three reference lengths
    pub fn resolve(&self, input: u32, original: u32, viewport: u32) -> u32 {
        match self.kind {
            ScaleType::Input => self.factor.apply(input),
            ScaleType::Original => self.factor.apply(original),
            ScaleType::Viewport => self.factor.apply(viewport),
            ScaleType::Absolute => self.factor.apply(1),
        }
    }
}

/// Scale rules for both axes of a pass target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "ScaleSpec")]
pub struct PassScale {
    pub x: AxisScale,
    pub y: AxisScale,
}

impl PassScale {
    /// Same rule on both axes
    pub fn uniform(kind: ScaleType, factor: ScaleFactor) -> Self {
        let axis = AxisScale { kind, factor };
        Self { x: axis, y: axis }
    }

    /// Computes the target size from the input, original and viewport sizes
    pub fn resolve(&self, input: (u32, u32), original: (u32, u32), viewport: (u32, u32)) -> (u32, u32) {
        (self.x.resolve(input.0, original.0, viewport.0), self.y.resolve(input.1, original.1, viewport.1))
    }

    /// Returns the absolute size along each axis that has one
    pub fn absolute_extent(&self) -> (Option<u32>, Option<u32>) {
        let absolute = |axis: &AxisScale| (axis.kind == ScaleType::Absolute).then(|| axis.factor.apply(1));
        (absolute(&self.x), absolute(&self.y))
    }
}

/// Scale block as written in YAML manifests
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScaleSpec {
    #[serde(rename = "type", default)]
    kind: ScaleType,
    #[serde(default)]
    type_x: Option<ScaleType>,
    #[serde(default)]
    type_y: Option<ScaleType>,
    #[serde(default)]
    factor: Option<ScaleFactor>,
    #[serde(default)]
    x: Option<ScaleFactor>,
    #[serde(default)]
    y: Option<ScaleFactor>,
}

impl TryFrom<ScaleSpec> for PassScale {
    type Error = PresetError;

    fn try_from(spec: ScaleSpec) -> Result<Self, Self::Error> {
        let axis = |kind: Option<ScaleType>, factor: Option<ScaleFactor>| -> Result<AxisScale, PresetError> {
            let kind = kind.unwrap_or(spec.kind);
            let factor = match factor.or(spec.factor) {
                Some(factor) => factor,
                None if kind == ScaleType::Absolute => return Err(PresetError::MissingKey("scale.x / scale.y for an absolute scale".to_string())),
                None => ScaleFactor::ONE,
            };
            Ok(AxisScale { kind, factor })
        };

        Ok(PassScale {
            x: axis(spec.type_x, spec.x)?,
            y: axis(spec.type_y, spec.y)?,
        })
    }
}

/// Texture sampling filter modes
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum FilterMode {
    /// Nearest neighbor filtering - sharp, pixelated
    #[serde(rename = "nearest")]
    Nearest,
    /// Linear interpolation filtering - smooth, blurred
    #[default]
    #[serde(rename = "linear")]
    Linear,
}

/// Color format of an intermediate pass target
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum TargetFormat {
    #[default]
    #[serde(rename = "rgba8")]
    Rgba8Unorm,
    #[serde(rename = "rgba8-srgb")]
    Rgba8UnormSrgb,
    #[serde(rename = "rgba16f")]
    Rgba16Float,
}

/// A single shader pass in the preset
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PassDescriptor {
    /// WGSL shader path, relative to the preset file
    pub shader: PathBuf,
    /// Filter used when this pass samples its inputs
    #[serde(default)]
    pub filter: FilterMode,
    /// Target size rule (ignored for the last pass, which draws to the host output)
    #[serde(default)]
    pub scale: PassScale,
    /// Cycle length of the frame counter seen by this pass; 0 means no cycle
    #[serde(default, deserialize_with = "deserialize_cycle")]
    pub frame_count_mod: Option<u32>,
    /// Extra name under which later passes may sample this pass's output
    #[serde(default)]
    pub alias: Option<String>,
    /// Color format of this pass's target
    #[serde(default)]
    pub format: TargetFormat,
}

fn deserialize_cycle<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(Option::<u32>::deserialize(deserializer)?.filter(|&cycle| cycle != 0))
}

impl PassDescriptor {
    /// Creates a pass with default filtering, scale and format
    pub fn new(shader: impl Into<PathBuf>) -> Self {
        Self {
            shader: shader.into(),
            filter: FilterMode::default(),
            scale: PassScale::default(),
            frame_count_mod: None,
            alias: None,
            format: TargetFormat::default(),
        }
    }
}

/// A lookup texture declared by the preset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextureReference {
    /// Name under which shaders sample the texture
    pub id: String,
    /// Image path, relative to the preset file
    pub path: PathBuf,
}

/// A complete shader preset
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preset {
    /// Shader passes, executed in order
    pub passes: Vec<PassDescriptor>,
    /// Lookup textures
    #[serde(default)]
    pub textures: Vec<TextureReference>,
    /// Explicit name -> canonical name table
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Preset {
    /// Parses a preset from YAML content
    ///
    /// # Arguments
    /// * `yaml_content` - YAML string containing the manifest
    pub fn from_yaml(yaml_content: &str) -> Result<Self, PresetError> {
        let preset: Preset = serde_norway::from_str(yaml_content)?;
        preset.validate()?;
        Ok(preset)
    }

    /// Parses a preset from libretro `.glslp` content
    pub fn from_glslp(content: &str) -> Result<Self, PresetError> {
        let preset = crate::glslp::parse(content)?;
        preset.validate()?;
        Ok(preset)
    }

    /// Parses a preset file, picking the format from its extension
    ///
    /// `.yaml` and `.yml` files are read as YAML manifests, anything else as `.glslp`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PresetError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PresetError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&content),
            _ => Self::from_glslp(&content),
        }
    }

    /// Validates the preset for structural correctness
    ///
    /// Checks that there is at least one pass and that texture ids and aliases are unique.
    pub fn validate(&self) -> Result<(), PresetError> {
        if self.passes.is_empty() {
            return Err(PresetError::NoPasses);
        }

        let mut texture_ids = HashSet::new();
        for texture in &self.textures {
            if texture.id.is_empty() {
                return Err(PresetError::InvalidValue {
                    key: "textures".to_string(),
                    value: String::new(),
                });
            }
            if !texture_ids.insert(texture.id.as_str()) {
                return Err(PresetError::DuplicateTexture(texture.id.clone()));
            }
        }

        let mut aliases = HashSet::new();
        for pass in &self.passes {
            if let Some(alias) = &pass.alias {
                if alias.is_empty() || texture_ids.contains(alias.as_str()) || !aliases.insert(alias.as_str()) {
                    return Err(PresetError::DuplicateAlias(alias.clone()));
                }
            }
        }

        Ok(())
    }

    /// Builds the alias table used during binding resolution
    ///
    /// Every pass alias maps to `Pass<k>`; explicit `aliases` entries are applied
    /// afterwards and win over pass aliases of the same name.
    pub fn alias_table(&self) -> BTreeMap<String, String> {
        let mut table: BTreeMap<String, String> = self
            .passes
            .iter()
            .enumerate()
            .filter_map(|(index, pass)| pass.alias.as_ref().map(|alias| (alias.clone(), format!("Pass{index}"))))
            .collect();
        table.extend(self.aliases.iter().map(|(name, target)| (name.clone(), target.clone())));
        table
    }
}
